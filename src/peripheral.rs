//! Peripheral role session.
//!
//! Advertises the relay service, registers its attribute table and answers
//! every write to the receive characteristic with an uppercased notification
//! on the send characteristic.

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::ble::connection::{ConnectOutcome, ConnectionState, LinkManager};
use crate::ble::host::{
    AdvertisingPayload, AttributeHandle, ConnectionHandle, HciStatus, PeripheralHost, RoleHandler,
};
use crate::ble::service::AttributeTable;
use crate::config::{OversizePolicy, RelayConfig};
use crate::error::{Error, Result};
use crate::events::{EventSink, StatusEvent};
use crate::relay::frame::{PeripheralFrame, PERIPHERAL_FRAME_MAX};
use crate::session::{Role, SessionState};

/// Peripheral session: one per process, owning its host and link state.
pub struct PeripheralSession<H: PeripheralHost> {
    host: H,
    config: RelayConfig,
    table: AttributeTable,
    link: LinkManager,
    registered: bool,
    events: EventSink,
}

impl<H: PeripheralHost> PeripheralSession<H> {
    /// Create a session around a host.
    pub fn new(host: H, config: RelayConfig) -> Self {
        let table = AttributeTable::relay(&config.descriptor);
        let events = EventSink::new(Role::Peripheral, config.event_capacity);
        Self {
            host,
            config,
            table,
            link: LinkManager::new(Role::Peripheral),
            registered: false,
            events,
        }
    }

    /// Start connectable advertising with the relay service UUID.
    pub fn start_peripheral(&mut self) -> Result<()> {
        if self.link.is_connected() {
            return Err(Error::InvalidParameter {
                name: "state".to_string(),
                value: self.link.state().to_string(),
            });
        }

        let payload = AdvertisingPayload::for_service(
            self.config.descriptor.service,
            self.config.device_name.clone(),
        );
        match self.host.start_advertising(&payload) {
            Ok(()) => {
                info!("Advertising started");
                self.link.begin_waiting();
                self.events.emit(StatusEvent::AdvertisingStarted);
                Ok(())
            }
            Err(e) => {
                warn!("Could not start advertising: {}", e);
                self.link.stop_waiting();
                self.events.emit(StatusEvent::AdvertisingFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Register the relay attribute table.
    ///
    /// A failure is fatal for the run; the caller should stop.
    pub fn start_service(&mut self) -> Result<()> {
        if self.registered {
            debug!("Service already registered");
            return Ok(());
        }

        match self.host.register_service(&self.table) {
            Ok(()) => {
                info!("Registered {}", self.table);
                self.registered = true;
                self.events.emit(StatusEvent::ServiceRegistered);
                Ok(())
            }
            Err(e) => {
                warn!("Could not register {}: {}", self.table, e);
                self.events.emit(StatusEvent::RegistrationFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Handle one inbound write: bound, uppercase and notify.
    ///
    /// Returns the number of bytes taken from the write.
    pub fn receive_data(&mut self, conn: ConnectionHandle, payload: Option<&[u8]>) -> Result<usize> {
        let Some(payload) = payload else {
            warn!("Write on {} carried no data", conn);
            self.events.emit(StatusEvent::NotifyFailed {
                reason: Error::MissingPayload.to_string(),
            });
            return Err(Error::MissingPayload);
        };

        let mut frame = match PeripheralFrame::new(payload) {
            Ok(frame) => frame,
            Err(e) => {
                let truncate = self.config.oversize_policy == OversizePolicy::Truncate;
                warn!(
                    "Received {} bytes, above the {} byte limit",
                    payload.len(),
                    PERIPHERAL_FRAME_MAX
                );
                self.events.emit(StatusEvent::FrameOversize {
                    len: payload.len(),
                    max: PERIPHERAL_FRAME_MAX,
                    truncated: truncate,
                });
                if !truncate {
                    return Err(e);
                }
                PeripheralFrame::truncated(payload)
            }
        };

        debug!("Received {} bytes on {}", frame.len(), conn);
        frame.make_uppercase();

        match self.notify_frame(&frame) {
            Ok(()) => {
                debug!("Notified {} bytes", frame.len());
                self.events.emit(StatusEvent::Notified { len: frame.len() });
                Ok(frame.len())
            }
            Err(e) => {
                warn!("Could not notify message: {}", e);
                self.events.emit(StatusEvent::NotifyFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn notify_frame(&mut self, frame: &PeripheralFrame) -> Result<()> {
        let conn = self.link.current_connection().ok_or(Error::NotConnected)?;
        self.host
            .notify(conn, self.config.descriptor.send, frame.as_bytes())
    }

    /// Combined session state.
    pub fn state(&self) -> SessionState {
        match self.link.state() {
            ConnectionState::Idle => SessionState::Idle,
            ConnectionState::Scanning | ConnectionState::Advertising => {
                SessionState::Advertising
            }
            ConnectionState::Connecting => SessionState::Connecting,
            ConnectionState::Connected => SessionState::Connected,
        }
    }

    /// Check if the attribute table is registered.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// The attribute table this session serves.
    pub fn table(&self) -> &AttributeTable {
        &self.table
    }

    /// Handle of the active link, if any.
    pub fn current_connection(&self) -> Option<ConnectionHandle> {
        self.link.current_connection()
    }

    /// The link manager.
    pub fn link(&self) -> &LinkManager {
        &self.link
    }

    /// Subscribe to status events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// The host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The host, mutably.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }
}

impl<H: PeripheralHost> RoleHandler for PeripheralSession<H> {
    fn role(&self) -> Role {
        Role::Peripheral
    }

    fn on_connected(&mut self, handle: ConnectionHandle, status: HciStatus) {
        match self.link.on_connected(handle, status) {
            ConnectOutcome::Established(conn) => {
                self.events.emit(StatusEvent::Connected { handle: conn });
            }
            ConnectOutcome::Failed(status) => {
                self.events.emit(StatusEvent::ConnectFailed {
                    reason: Error::ConnectionFailed { status }.to_string(),
                });
            }
            ConnectOutcome::Ignored => {}
        }
    }

    fn on_disconnected(&mut self, handle: ConnectionHandle, reason: HciStatus) {
        let released = self.link.on_disconnected(handle, reason);
        if released.is_none() && self.link.current_connection().is_some() {
            return;
        }
        self.events.emit(StatusEvent::Disconnected {
            handle: released.map(|active| active.handle),
            reason,
        });
    }

    fn on_write_received(
        &mut self,
        handle: ConnectionHandle,
        attribute: AttributeHandle,
        payload: Option<&[u8]>,
    ) {
        debug!("Write to {} on {}", attribute, handle);
        // Outcomes are already reported as status events.
        let _ = self.receive_data(handle, payload);
    }
}
