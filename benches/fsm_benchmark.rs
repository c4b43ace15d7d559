use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use si446x_rs::radio::{
    lookup, Driver, Event, ManualScheduler, MockTransport, ModemPend, PhPend, RadioConfig, State,
};

type BenchDriver = Driver<MockTransport, ManualScheduler>;

fn powered_driver() -> (BenchDriver, MockTransport, ManualScheduler) {
    let chip = MockTransport::new();
    let sched = ManualScheduler::new();
    let mut driver = Driver::new(chip.clone(), sched.clone(), &RadioConfig::default()).unwrap();
    driver.control("TURNON").unwrap();
    while let Some(event) = sched.next_event() {
        driver.on_scheduler_event(event).unwrap();
    }
    (driver, chip, sched)
}

fn benchmark_lookup(c: &mut Criterion) {
    c.bench_function("lookup_all_pairs", |b| {
        b.iter(|| {
            let mut found = 0;
            for state in State::ALL {
                for event in Event::ALL {
                    if lookup(black_box(state), black_box(event)).is_some() {
                        found += 1;
                    }
                }
            }
            black_box(found)
        })
    });
}

fn benchmark_power_up(c: &mut Criterion) {
    c.bench_function("power_up_to_rx_idle", |b| {
        b.iter(|| black_box(powered_driver().0.state()))
    });
}

fn benchmark_receive(c: &mut Criterion) {
    let packet: Vec<u8> = std::iter::once(31u8).chain(0..31).collect();

    c.bench_function("receive_one_packet", |b| {
        b.iter_batched(
            powered_driver,
            |(mut driver, chip, _sched)| {
                chip.chip().load_rx(&packet, 31);
                chip.chip().raise_modem(ModemPend::SYNC_DETECT);
                chip.chip().raise_ph(PhPend::PACKET_RX);
                black_box(driver.on_interrupt().unwrap());
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, benchmark_lookup, benchmark_power_up, benchmark_receive);
criterion_main!(benches);
