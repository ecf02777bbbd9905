//! End-to-end relay tests over the loopback host pair.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uppercase_ble::ble::host::AttStatus;
use uppercase_ble::loopback::{LoopbackAir, LoopbackCentral};
use uppercase_ble::{
    outbound_channel, run_central, run_peripheral, CentralSession, Error, HciStatus, LineSender,
    OversizePolicy, PeripheralSession, RelayConfig, RoleHandler, SessionState, StatusEvent,
};

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

struct Relay {
    air: LoopbackAir,
    lines: LineSender,
    central_status: broadcast::Receiver<StatusEvent>,
    peripheral_status: broadcast::Receiver<StatusEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl Relay {
    fn start(config: RelayConfig) -> Self {
        init_tracing();
        let air = LoopbackAir::new();
        let (central_host, central_events) = air.central();
        let (peripheral_host, peripheral_events) = air.peripheral();

        let mut peripheral = PeripheralSession::new(peripheral_host, config.clone());
        let peripheral_status = peripheral.subscribe_events();
        peripheral.start_service().unwrap();
        peripheral.start_peripheral().unwrap();

        let (lines, outbound) = outbound_channel(config.outbound_capacity);
        let mut central = CentralSession::new(central_host, config);
        let central_status = central.subscribe_events();
        central.start_central().unwrap();

        let tasks = vec![
            tokio::spawn(async move { run_peripheral(&mut peripheral, peripheral_events).await }),
            tokio::spawn(async move { run_central(&mut central, central_events, outbound).await }),
        ];

        Self {
            air,
            lines,
            central_status,
            peripheral_status,
            tasks,
        }
    }

    async fn stop(self) {
        self.air.shutdown();
        for task in self.tasks {
            task.await.unwrap();
        }
    }
}

fn fast_config() -> RelayConfig {
    RelayConfig::default().with_settle_delay(Duration::from_millis(5))
}

/// Wait for the first event matching `predicate`, returning it.
async fn wait_for(
    rx: &mut broadcast::Receiver<StatusEvent>,
    predicate: impl Fn(&StatusEvent) -> bool,
) -> StatusEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("status channel failed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for status event")
}

async fn wait_subscribed(relay: &mut Relay) {
    wait_for(&mut relay.central_status, |e| {
        matches!(e, StatusEvent::Subscribed { .. })
    })
    .await;
}

#[tokio::test]
async fn test_hello_comes_back_uppercase() {
    let mut relay = Relay::start(fast_config());
    wait_subscribed(&mut relay).await;

    relay.lines.send_line("hello").await.unwrap();

    let event = wait_for(&mut relay.central_status, |e| {
        matches!(e, StatusEvent::MessageReceived { .. })
    })
    .await;
    assert_eq!(
        event,
        StatusEvent::MessageReceived {
            text: "HELLO".to_string()
        }
    );

    relay.stop().await;
}

#[tokio::test]
async fn test_lines_arrive_in_order() {
    let mut relay = Relay::start(fast_config());
    wait_subscribed(&mut relay).await;

    for line in ["one", "Two 2", "three!\r\n"] {
        relay.lines.send_line(line).await.unwrap();
    }

    let mut texts = Vec::new();
    while texts.len() < 3 {
        if let StatusEvent::MessageReceived { text } = wait_for(&mut relay.central_status, |e| {
            matches!(e, StatusEvent::MessageReceived { .. })
        })
        .await
        {
            texts.push(text);
        }
    }
    assert_eq!(texts, vec!["ONE", "TWO 2", "THREE!"]);

    relay.stop().await;
}

#[tokio::test]
async fn test_forty_byte_line_is_rejected_before_sending() {
    let mut relay = Relay::start(fast_config());
    wait_subscribed(&mut relay).await;

    let line = "a".repeat(40);
    assert!(matches!(
        relay.lines.send_line(&line).await,
        Err(Error::FrameTooLarge { len: 40, max: 32 })
    ));

    // The link keeps working.
    relay.lines.send_line("ok").await.unwrap();
    let event = wait_for(&mut relay.central_status, |e| {
        matches!(e, StatusEvent::MessageReceived { .. })
    })
    .await;
    assert_eq!(
        event,
        StatusEvent::MessageReceived {
            text: "OK".to_string()
        }
    );

    relay.stop().await;
}

#[tokio::test]
async fn test_peripheral_rejects_frames_above_sixteen_bytes() {
    let mut relay = Relay::start(fast_config());
    wait_subscribed(&mut relay).await;

    relay.lines.send_line(&"x".repeat(20)).await.unwrap();
    let event = wait_for(&mut relay.peripheral_status, |e| {
        matches!(e, StatusEvent::FrameOversize { .. })
    })
    .await;
    assert_eq!(
        event,
        StatusEvent::FrameOversize {
            len: 20,
            max: 16,
            truncated: false
        }
    );

    // Nothing was notified for the oversize frame; the next one goes through.
    relay.lines.send_line("next").await.unwrap();
    let event = wait_for(&mut relay.central_status, |e| {
        matches!(e, StatusEvent::MessageReceived { .. })
    })
    .await;
    assert_eq!(
        event,
        StatusEvent::MessageReceived {
            text: "NEXT".to_string()
        }
    );

    relay.stop().await;
}

#[tokio::test]
async fn test_peripheral_truncates_when_configured() {
    let mut relay = Relay::start(fast_config().with_oversize_policy(OversizePolicy::Truncate));
    wait_subscribed(&mut relay).await;

    relay.lines.send_line("abcdefghijklmnopqrst").await.unwrap();
    let event = wait_for(&mut relay.central_status, |e| {
        matches!(e, StatusEvent::MessageReceived { .. })
    })
    .await;
    assert_eq!(
        event,
        StatusEvent::MessageReceived {
            text: "ABCDEFGHIJKLMNOP".to_string()
        }
    );

    relay.stop().await;
}

#[tokio::test]
async fn test_disconnect_stops_sending() {
    let mut relay = Relay::start(fast_config());
    wait_subscribed(&mut relay).await;

    relay.air.disconnect(HciStatus::REMOTE_USER_TERMINATED);
    let event = wait_for(&mut relay.central_status, |e| {
        matches!(e, StatusEvent::Disconnected { .. })
    })
    .await;
    assert!(matches!(
        event,
        StatusEvent::Disconnected {
            handle: Some(_),
            reason: HciStatus::REMOTE_USER_TERMINATED
        }
    ));
    wait_for(&mut relay.peripheral_status, |e| {
        matches!(e, StatusEvent::Disconnected { .. })
    })
    .await;

    relay.lines.send_line("anyone?").await.unwrap();
    let event = wait_for(&mut relay.central_status, |e| {
        matches!(e, StatusEvent::SendFailed { .. })
    })
    .await;
    assert_eq!(
        event,
        StatusEvent::SendFailed {
            reason: Error::NotConnected.to_string()
        }
    );

    relay.stop().await;
}

#[tokio::test]
async fn test_failed_subscription_leaves_peripheral_unable_to_notify() {
    init_tracing();
    let air = LoopbackAir::new();
    air.fail_subscribe(AttStatus::WRITE_NOT_PERMITTED);

    let (central_host, central_events) = air.central();
    let (peripheral_host, peripheral_events) = air.peripheral();

    let mut peripheral = PeripheralSession::new(peripheral_host, fast_config());
    let mut peripheral_status = peripheral.subscribe_events();
    peripheral.start_service().unwrap();
    peripheral.start_peripheral().unwrap();

    let (lines, outbound) = outbound_channel(4);
    let mut central = CentralSession::new(central_host, fast_config());
    let mut central_status = central.subscribe_events();
    central.start_central().unwrap();

    let peripheral_task =
        tokio::spawn(async move { run_peripheral(&mut peripheral, peripheral_events).await });
    let central_task =
        tokio::spawn(async move { run_central(&mut central, central_events, outbound).await });

    wait_for(&mut central_status, |e| {
        matches!(e, StatusEvent::SubscribeFailed { .. })
    })
    .await;

    // The Central stays connected and can still send.
    lines.send_line("hi").await.unwrap();
    wait_for(&mut central_status, |e| {
        matches!(e, StatusEvent::MessageSent { len: 2 })
    })
    .await;
    wait_for(&mut peripheral_status, |e| {
        matches!(e, StatusEvent::NotifyFailed { .. })
    })
    .await;

    air.shutdown();
    central_task.await.unwrap();
    peripheral_task.await.unwrap();
}

/// Feed every queued host callback to the session.
fn pump(
    session: &mut CentralSession<LoopbackCentral>,
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<uppercase_ble::HostEvent>,
) {
    while let Ok(event) = rx.try_recv() {
        session.dispatch(event);
    }
}

#[test]
fn test_failed_connect_then_manual_restart() {
    let air = LoopbackAir::new();
    let (central_host, mut central_events) = air.central();
    let (peripheral_host, _peripheral_events) = air.peripheral();

    let mut peripheral = PeripheralSession::new(peripheral_host, RelayConfig::default());
    peripheral.start_service().unwrap();
    peripheral.start_peripheral().unwrap();

    let mut central = CentralSession::new(central_host, RelayConfig::default());
    air.fail_next_connect();
    central.start_central().unwrap();
    pump(&mut central, &mut central_events);

    // Failed attempt: no link, no discovery, not retried.
    assert_eq!(central.state(), SessionState::Scanning);
    assert_eq!(central.current_connection(), None);
    assert!(air.link().is_none());

    // A supervisor restarts scanning.
    central.start_central().unwrap();
    pump(&mut central, &mut central_events);

    assert_eq!(central.state(), SessionState::Subscribed);
    assert_eq!(central.current_connection(), air.link());
}
