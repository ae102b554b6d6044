//! Polling integration tests
//!
//! Drives channels and schedulers against a scripted gateway on a paused clock.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use common::FakeGateway;
use modbus_monitor::error::Error;
use modbus_monitor::modbus::{
    AddressRange, BinaryState, Coils, DataChannel, DiscreteInputs, Domain, HoldingRegisters,
    PollingScheduler, Readout,
};

fn range(start: u16, count: u16) -> AddressRange {
    AddressRange { start, count }
}

fn registers(gateway: &Arc<FakeGateway>, r: AddressRange) -> Arc<DataChannel<HoldingRegisters>> {
    Arc::new(DataChannel::new(gateway.clone(), r).unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_click_shows_value_of_address() {
    let gateway = Arc::new(FakeGateway::new());
    gateway.push(Duration::ZERO, Ok(Readout::Registers((1..=10).collect())));
    let channel = registers(&gateway, range(0, 10));

    channel.fetch_current().await.unwrap();
    let selection = channel.select(3).await;

    assert_eq!(selection.address, Some(3));
    assert_eq!(selection.value, Some(4));
    assert_eq!(gateway.requested(), vec![(Domain::Registers, range(0, 10))]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_response_does_not_overwrite_newer_result() {
    let gateway = Arc::new(FakeGateway::new());
    gateway.push(Duration::from_millis(500), Ok(Readout::Registers(vec![1; 5])));
    gateway.push(Duration::from_millis(10), Ok(Readout::Registers(vec![2; 5])));
    let channel = registers(&gateway, range(0, 5));

    let (older, newer) = tokio::join!(channel.fetch(range(0, 5)), channel.fetch(range(0, 5)));

    // Both resolve, only the later issue is applied
    assert_eq!(older.unwrap().get(0), Some(&1));
    assert_eq!(newer.unwrap().get(0), Some(&2));
    assert_eq!(channel.result().await.unwrap().get(0), Some(&2));
    assert!(!channel.poll_state().await.loading);
}

#[tokio::test(start_paused = true)]
async fn test_late_failure_does_not_replace_newer_result() {
    let gateway = Arc::new(FakeGateway::new());
    gateway.push(
        Duration::from_millis(500),
        Err(Error::Connectivity("timed out".into())),
    );
    gateway.push(Duration::from_millis(10), Ok(Readout::Registers(vec![9; 5])));
    let channel = registers(&gateway, range(0, 5));

    let (older, newer) = tokio::join!(channel.fetch(range(0, 5)), channel.fetch(range(0, 5)));

    assert!(older.is_err());
    assert!(newer.is_ok());
    assert!(channel.poll_state().await.last_error.is_none());
    assert_eq!(channel.result().await.unwrap().get(4), Some(&9));
}

#[tokio::test(start_paused = true)]
async fn test_stop_lets_in_flight_fetch_land() {
    let gateway = Arc::new(FakeGateway::new());
    gateway.set_delay(Duration::from_millis(300));
    let scheduler = PollingScheduler::new(
        registers(&gateway, range(0, 10)),
        Duration::from_millis(1000),
    );

    scheduler.start().await;
    // Second fetch is issued at t=1000 and resolves at t=1300
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(gateway.reads(), 2);
    assert!(scheduler.stop().await);

    tokio::time::sleep(Duration::from_millis(4000)).await;
    assert_eq!(gateway.reads(), 2);
    let channel = scheduler.channel();
    assert_eq!(channel.result().await.unwrap().get(0), Some(&2));
    assert!(!channel.poll_state().await.auto_refresh_enabled);

    // Restart fetches immediately, then on the period
    assert!(scheduler.start().await);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gateway.reads(), 3);
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(gateway.reads(), 4);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_gateway_skips_ticks() {
    let gateway = Arc::new(FakeGateway::new());
    gateway.set_delay(Duration::from_millis(2500));
    let scheduler = PollingScheduler::new(
        registers(&gateway, range(0, 2)),
        Duration::from_millis(1000),
    );

    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(3500)).await;

    // t=0 issues, t=1000 and t=2000 are skipped, t=3000 issues
    assert_eq!(gateway.reads(), 2);
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_polling_keeps_going_after_errors() {
    let gateway = Arc::new(FakeGateway::new());
    gateway.push(Duration::ZERO, Err(Error::Server { status: 503 }));
    let scheduler = PollingScheduler::new(
        registers(&gateway, range(0, 3)),
        Duration::from_millis(1000),
    );

    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        scheduler.channel().poll_state().await.last_error,
        Some(Error::Server { status: 503 })
    );

    tokio::time::sleep(Duration::from_millis(1000)).await;
    let state = scheduler.channel().poll_state().await;
    assert!(state.last_error.is_none());
    assert!(scheduler.channel().result().await.is_some());

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_sparse_coils_are_densified() {
    let gateway = Arc::new(FakeGateway::new());
    gateway.set_binary(BTreeMap::from([(3, BinaryState::On)]));
    let channel: DataChannel<Coils> = DataChannel::new(gateway.clone(), range(0, 5)).unwrap();

    let result = channel.fetch_current().await.unwrap();

    let states: Vec<BinaryState> = result.iter().map(|(_, state)| *state).collect();
    assert_eq!(
        states,
        vec![
            BinaryState::Off,
            BinaryState::Off,
            BinaryState::Off,
            BinaryState::On,
            BinaryState::Off
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_selection_follows_refresh() {
    let gateway = Arc::new(FakeGateway::new());
    gateway.set_binary(BTreeMap::from([(12, BinaryState::On)]));
    let channel: DataChannel<DiscreteInputs> =
        DataChannel::new(gateway.clone(), range(10, 5)).unwrap();

    channel.fetch_current().await.unwrap();
    assert_eq!(channel.select(12).await.value, Some(BinaryState::On));

    gateway.set_binary(BTreeMap::new());
    channel.fetch_current().await.unwrap();
    assert_eq!(channel.selection().await.value, Some(BinaryState::Off));

    // Address outside the current result clears the selection
    assert!(channel.select(40).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_range_edit_takes_effect_on_next_tick() {
    let gateway = Arc::new(FakeGateway::new());
    let scheduler = PollingScheduler::new(
        registers(&gateway, range(0, 10)),
        Duration::from_millis(1000),
    );

    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    scheduler.channel().set_start(50).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    scheduler.stop().await;

    assert_eq!(
        gateway.requested(),
        vec![
            (Domain::Registers, range(0, 10)),
            (Domain::Registers, range(50, 10))
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_fetch_does_not_leave_channel_loading() {
    let gateway = Arc::new(FakeGateway::new());
    gateway.push(Duration::from_secs(10), Ok(Readout::Registers(vec![1; 3])));
    let channel = registers(&gateway, range(0, 3));

    let abandoned =
        tokio::time::timeout(Duration::from_millis(100), channel.fetch_current()).await;
    assert!(abandoned.is_err());
    assert!(!channel.poll_state().await.loading);

    channel.fetch_current().await.unwrap();
    assert!(!channel.poll_state().await.loading);
    assert!(!channel.snapshot().await.loading);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_range_skips_ticks_until_corrected() {
    let gateway = Arc::new(FakeGateway::new());
    let scheduler = PollingScheduler::new(
        registers(&gateway, range(0, 10)),
        Duration::from_millis(1000),
    );
    let channel = scheduler.channel().clone();

    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gateway.reads(), 1);

    assert!(channel.set_count(500).await.is_err());
    tokio::time::sleep(Duration::from_millis(2000)).await;

    // Two ticks passed without a request; polling itself is still running
    assert_eq!(gateway.reads(), 1);
    assert!(scheduler.is_polling());
    let error = channel.poll_state().await.last_error.unwrap();
    assert_eq!(error.kind(), "validation");
    assert!(channel.result().await.is_some());

    channel.set_count(20).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert_eq!(gateway.reads(), 2);
    assert_eq!(gateway.requested()[1], (Domain::Registers, range(0, 20)));
    assert!(channel.poll_state().await.last_error.is_none());

    scheduler.stop().await;
}
