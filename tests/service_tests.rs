//! The driver running as a tokio service

use bytes::Bytes;
use si446x_rs::radio::{
    DriverHandle, MockTransport, ModemPend, Notification, Outcome, PhPend, SendCondition, State,
    StatusReport, TraceKind,
};
use si446x_rs::{DriverError, RadioConfig, ServiceBuilder};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

async fn wait_for(handle: &DriverHandle, state: State) -> StatusReport {
    for _ in 0..100 {
        let status = handle.status().await.unwrap();
        if status.state == state {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("driver never reached {:?}", state);
}

#[tokio::test(start_paused = true)]
async fn test_send_completes_through_interrupt_line() {
    let chip = MockTransport::new();
    let builder = ServiceBuilder::new();
    let line = builder.interrupt_line();
    let mut service = builder.spawn(chip.clone(), &RadioConfig::default()).unwrap();
    let handle = service.handle.clone();

    assert_eq!(handle.control("turnon").await.unwrap(), Outcome::Ok);
    wait_for(&handle, State::RxIdle).await;

    assert_eq!(
        handle.send(Bytes::from_static(b"hello"), 0x20).await.unwrap(),
        Outcome::Ok
    );
    // only one transmit at a time
    assert_eq!(
        handle.send(Bytes::from_static(b"again"), 0).await.unwrap(),
        Outcome::Busy
    );
    assert_eq!(chip.chip().tx_fifo, b"hello");

    {
        let mut chip = chip.chip();
        chip.transmit(5);
        chip.raise_ph(PhPend::PACKET_SENT);
    }
    line.raise();

    let mut seen = Vec::new();
    while let Some(notification) = service.notifications.recv().await {
        let done = matches!(notification, Notification::SendComplete(_));
        seen.push(notification);
        if done {
            break;
        }
    }
    assert_eq!(
        seen,
        vec![
            Notification::NewStatus("OFF"),
            Notification::NewStatus("ON"),
            Notification::SendComplete(SendCondition::Ok),
        ]
    );

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, State::RxIdle);
    assert_eq!(status.tx.packets, 1);
    assert_eq!(status.tx.power, 0x20);

    assert_ok!(handle.shutdown().await);
    assert_ok!(service.task.await.unwrap());
    assert!(!chip.chip().powered);
}

#[tokio::test(start_paused = true)]
async fn test_handle_queries() {
    let chip = MockTransport::new();
    let config = RadioConfig {
        start_on_boot: true,
        cca_threshold: 0x30,
        ..RadioConfig::default()
    };
    let builder = ServiceBuilder::new();
    let line = builder.interrupt_line();
    let service = builder.spawn(chip.clone(), &config).unwrap();
    let handle = service.handle;
    wait_for(&handle, State::RxIdle).await;
    assert!(handle.channel_clear().await.unwrap());

    // RSSI is latched when a sync word is detected
    {
        let mut chip = chip.chip();
        chip.latched_rssi = 0x50;
        chip.raise_modem(ModemPend::SYNC_DETECT);
    }
    line.raise();
    wait_for(&handle, State::RxActive).await;
    assert_eq!(handle.cca().await.unwrap(), 0x50);
    assert!(!handle.channel_clear().await.unwrap());

    assert_eq!(handle.control("bogus").await.unwrap(), Outcome::Error);
    assert_eq!(handle.control("TURNON").await.unwrap(), Outcome::Already);

    let trace = handle.dump_trace(3).await.unwrap();
    assert_eq!(trace.len(), 3);
    assert!(trace
        .iter()
        .any(|r| matches!(r.kind, TraceKind::Anomaly { .. } | TraceKind::Control { .. })));

    let cleared = handle.clear_status().await.unwrap();
    assert_eq!(cleared.unshuts, 1);
    assert_eq!(handle.status().await.unwrap().unshuts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_transition_stops_service() {
    let chip = MockTransport::new();
    let builder = ServiceBuilder::new();
    let line = builder.interrupt_line();
    let config = RadioConfig {
        start_on_boot: true,
        ..RadioConfig::default()
    };
    let service = builder.spawn(chip.clone(), &config).unwrap();
    wait_for(&service.handle, State::RxIdle).await;

    chip.chip().raise_ph(PhPend::PACKET_SENT);
    line.raise();

    let err = assert_err!(service.task.await.unwrap());
    assert!(matches!(
        err,
        DriverError::FatalTransition {
            state: State::RxIdle,
            ..
        }
    ));
    assert!(matches!(
        service.handle.status().await,
        Err(DriverError::ChannelClosed)
    ));
}
