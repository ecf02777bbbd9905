//! Async drivers for the role sessions.
//!
//! Each session runs in one task that owns it. Host callbacks arrive on an
//! unbounded channel and are dispatched one at a time. The Central task also
//! drains console lines from a bounded queue, holding each write back until
//! the settle delay after the previous successful write has passed.

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::ble::host::{CentralHost, HostEvent, PeripheralHost, RoleHandler};
use crate::central::CentralSession;
use crate::error::{Error, Result};
use crate::peripheral::PeripheralSession;
use crate::relay::frame::CentralFrame;
use crate::relay::throttle::SendThrottle;

/// Sending half of a host callback channel.
pub type HostEventSender = mpsc::UnboundedSender<HostEvent>;

/// Receiving half of a host callback channel.
pub type HostEventReceiver = mpsc::UnboundedReceiver<HostEvent>;

/// Create a host callback channel.
pub fn host_event_channel() -> (HostEventSender, HostEventReceiver) {
    mpsc::unbounded_channel()
}

/// Create the bounded outbound line queue of a Central.
pub fn outbound_channel(capacity: usize) -> (LineSender, OutboundQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (LineSender { tx }, OutboundQueue { rx })
}

/// Producer side of the outbound queue, e.g. a console reader.
#[derive(Debug, Clone)]
pub struct LineSender {
    tx: mpsc::Sender<CentralFrame>,
}

impl LineSender {
    /// Queue one console line, waiting for room in the queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] for lines above 32 bytes (after the
    /// line terminator is dropped) and [`Error::ChannelClosed`] once the
    /// Central task has stopped.
    pub async fn send_line(&self, line: &str) -> Result<()> {
        let frame = CentralFrame::from_line(line)?;
        self.tx.send(frame).await.map_err(|_| Error::ChannelClosed)
    }

    /// Queue one console line without waiting.
    pub fn try_send_line(&self, line: &str) -> Result<()> {
        let frame = CentralFrame::from_line(line)?;
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                Error::Internal("outbound queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => Error::ChannelClosed,
        })
    }
}

/// Consumer side of the outbound queue, owned by the Central task.
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::Receiver<CentralFrame>,
}

async fn next_frame(
    rx: &mut mpsc::Receiver<CentralFrame>,
    throttle: &SendThrottle,
) -> Option<CentralFrame> {
    throttle.ready().await;
    rx.recv().await
}

/// Drive a Central session until its host goes away.
///
/// Host callbacks take priority over queued lines. When every [`LineSender`]
/// is dropped the task keeps serving callbacks.
pub async fn run_central<H: CentralHost>(
    session: &mut CentralSession<H>,
    mut host_events: HostEventReceiver,
    outbound: OutboundQueue,
) {
    let mut throttle = SendThrottle::new(session.config().settle_delay);
    let mut outbound = Some(outbound);

    loop {
        tokio::select! {
            biased;

            event = host_events.recv() => match event {
                Some(event) => session.dispatch(event),
                None => {
                    info!("Host event channel closed, stopping central");
                    break;
                }
            },

            frame = async {
                match outbound.as_mut() {
                    Some(queue) => next_frame(&mut queue.rx, &throttle).await,
                    None => std::future::pending::<Option<CentralFrame>>().await,
                }
            } => match frame {
                Some(frame) => {
                    if session.send_frame(&frame).is_ok() {
                        throttle.arm();
                    }
                }
                None => {
                    debug!("Outbound queue closed");
                    outbound = None;
                }
            },
        }
    }
}

/// Drive a Peripheral session until its host goes away.
pub async fn run_peripheral<H: PeripheralHost>(
    session: &mut PeripheralSession<H>,
    mut host_events: HostEventReceiver,
) {
    while let Some(event) = host_events.recv().await {
        session.dispatch(event);
    }
    info!("Host event channel closed, stopping peripheral");
}
