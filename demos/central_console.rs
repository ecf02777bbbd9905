//! Console example: relay stdin lines to an uppercase Peripheral over a real adapter
//!
//! Run with: cargo run --example central_console
//!
//! Each line (up to 32 bytes) is written to the Peripheral; the uppercased
//! reply is printed when its notification arrives.

use tokio::io::{AsyncBufReadExt, BufReader};
use uppercase_ble::{
    outbound_channel, run_central, BtleplugCentral, CentralSession, Error, RelayConfig, Result,
    StatusEvent,
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
    println!("Scanning for the uppercase relay service...");

    let (host, host_events) = BtleplugCentral::new(vec![config.descriptor.service]).await?;
    let (lines, outbound) = outbound_channel(config.outbound_capacity);

    let mut session = CentralSession::new(host, config);
    let mut status = session.subscribe_events();
    session.start_central()?;

    // Print status updates as they arrive
    tokio::spawn(async move {
        while let Ok(event) = status.recv().await {
            match event {
                StatusEvent::Subscribed { .. } => println!("Ready. Type a message:"),
                StatusEvent::MessageReceived { text } => println!("=> {}", text),
                StatusEvent::Disconnected { reason, .. } => {
                    println!("Disconnected (reason {})", reason)
                }
                event if event.is_failure() => println!("! {:?}", event),
                _ => {}
            }
        }
    });

    // Read stdin lines into the outbound queue
    tokio::spawn(async move {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = stdin.next_line().await {
            match lines.send_line(&line).await {
                Ok(()) => {}
                Err(Error::FrameTooLarge { len, max }) => {
                    println!("Message too long ({} bytes, max {})", len, max)
                }
                Err(e) => {
                    println!("Stopping input: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = run_central(&mut session, host_events, outbound) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
    }

    session.host().shutdown().await?;
    Ok(())
}
