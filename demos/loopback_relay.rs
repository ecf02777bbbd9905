//! Loopback example: run a Central and a Peripheral against each other in memory
//!
//! Run with: cargo run --example loopback_relay

use std::time::Duration;
use uppercase_ble::loopback::LoopbackAir;
use uppercase_ble::{
    outbound_channel, run_central, run_peripheral, CentralSession, HciStatus, PeripheralSession,
    RelayConfig, Result, StatusEvent,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("uppercase_ble=info".parse().unwrap()),
        )
        .init();

    let config = RelayConfig::default();
    let air = LoopbackAir::new();
    let (central_host, central_events) = air.central();
    let (peripheral_host, peripheral_events) = air.peripheral();

    let mut peripheral = PeripheralSession::new(peripheral_host, config.clone());
    peripheral.start_service()?;
    peripheral.start_peripheral()?;
    let peripheral_task = tokio::spawn(async move {
        run_peripheral(&mut peripheral, peripheral_events).await;
    });

    let (lines, outbound) = outbound_channel(config.outbound_capacity);
    let mut central = CentralSession::new(central_host, config);
    let mut status = central.subscribe_events();
    central.start_central()?;
    let central_task = tokio::spawn(async move {
        run_central(&mut central, central_events, outbound).await;
    });

    let messages = ["hello", "low energy", "mixed Case 123!"];
    let mut received = 0;

    while let Ok(event) = status.recv().await {
        println!("[central] {:?}", event);
        match event {
            StatusEvent::Subscribed { .. } => {
                for message in messages {
                    if let Err(e) = lines.send_line(message).await {
                        println!("Could not queue {:?}: {}", message, e);
                    }
                }
            }
            StatusEvent::MessageReceived { text } => {
                println!("=> {}", text);
                received += 1;
                if received == messages.len() {
                    break;
                }
            }
            StatusEvent::DiscoveryAbandoned { .. } => break,
            _ => {}
        }
    }

    // Leave a moment for the last status events, then tear down.
    tokio::time::sleep(Duration::from_millis(100)).await;
    air.disconnect(HciStatus::REMOTE_USER_TERMINATED);
    air.shutdown();

    let _ = central_task.await;
    let _ = peripheral_task.await;
    println!("Done.");
    Ok(())
}
