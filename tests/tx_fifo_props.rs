//! TX FIFO backpressure properties

mod support;

use bytes::Bytes;
use proptest::collection::vec;
use proptest::prelude::*;
use si446x_rs::radio::{Outcome, PhPend, State};
use support::Rig;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_fill_never_exceeds_free_space(
        len in 1usize..400,
        drains in vec(1usize..=64, 1..32),
    ) {
        let mut rig = Rig::powered();
        let payload: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
        prop_assert_eq!(rig.driver.send(Bytes::from(payload.clone()), 0).unwrap(), Outcome::Ok);

        // every step drains at least one byte, so this bound always suffices
        for &drain in drains.iter().cycle().take(len + 64) {
            if rig.driver.context().tx.offset == len {
                break;
            }
            rig.chip.chip().transmit(drain);
            rig.ph(PhPend::TX_FIFO_ALMOST_EMPTY);
            prop_assert!(rig.driver.context().tx.offset <= len);
        }
        prop_assert_eq!(rig.driver.context().tx.offset, len);

        // once everything is queued a threshold writes nothing
        let writes = rig.chip.chip().tx_writes.len();
        rig.chip.chip().transmit(64);
        rig.ph(PhPend::TX_FIFO_ALMOST_EMPTY);
        prop_assert_eq!(rig.chip.chip().tx_writes.len(), writes);
        prop_assert_eq!(rig.driver.state(), State::TxActive);

        let chip = rig.chip.chip();
        prop_assert!(!chip.fifo_fault);
        for (written, space) in chip.tx_writes.iter().zip(&chip.tx_space_at_write) {
            prop_assert!(written <= space);
        }
        prop_assert_eq!(&chip.tx_history, &payload);
    }
}
