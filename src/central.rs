//! Central role session.
//!
//! Scans for the relay Peripheral, connects, walks discovery down to the
//! receive characteristic, subscribes to notifications and sends text frames
//! with writes without response.

use btleplug::api::WriteType;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::ble::connection::{ConnectOutcome, ConnectionState, LinkManager};
use crate::ble::discovery::{AbandonReason, DiscoveryEngine, DiscoveryState, DiscoveryStep};
use crate::ble::host::{
    Advertisement, AttStatus, AttributeHandle, CentralHost, ConnectionHandle, DiscoverParams,
    DiscoveredAttribute, DiscoveryKind, HciStatus, RoleHandler, ScanMode,
};
use crate::ble::subscription::{NotificationOutcome, SubscriptionManager, SubscriptionRecord};
use crate::ble::uuids::display_uuid;
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::events::{EventSink, StatusEvent};
use crate::relay::frame::{CentralFrame, CENTRAL_FRAME_MAX};
use crate::session::{Role, SessionState};

/// Central session: one per process, owning its host and all link state.
pub struct CentralSession<H: CentralHost> {
    host: H,
    config: RelayConfig,
    link: LinkManager,
    discovery: DiscoveryEngine,
    subscription: SubscriptionManager<CENTRAL_FRAME_MAX>,
    events: EventSink,
}

impl<H: CentralHost> CentralSession<H> {
    /// Create a session around a host.
    pub fn new(host: H, config: RelayConfig) -> Self {
        let descriptor = config.descriptor;
        let events = EventSink::new(Role::Central, config.event_capacity);
        Self {
            host,
            config,
            link: LinkManager::new(Role::Central),
            discovery: DiscoveryEngine::new(descriptor.service, descriptor.receive),
            subscription: SubscriptionManager::new(),
            events,
        }
    }

    /// Start passive scanning for the relay Peripheral.
    ///
    /// Also used by a supervisor to resume after a failed connection attempt.
    pub fn start_central(&mut self) -> Result<()> {
        if self.link.is_connected() || self.link.state() == ConnectionState::Connecting {
            return Err(Error::InvalidParameter {
                name: "state".to_string(),
                value: self.link.state().to_string(),
            });
        }

        info!("Starting scan for {}", display_uuid(&self.config.descriptor.service));
        match self.host.start_scanning(ScanMode::Passive) {
            Ok(()) => {
                self.link.begin_waiting();
                self.events.emit(StatusEvent::ScanStarted);
                Ok(())
            }
            Err(e) => {
                warn!("Could not start scanning: {}", e);
                self.link.stop_waiting();
                self.events.emit(StatusEvent::ScanFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Send one console line to the Peripheral.
    pub fn send_line(&mut self, line: &str) -> Result<()> {
        let frame = CentralFrame::from_line(line).map_err(|e| {
            warn!("Line rejected before sending: {}", e);
            self.events.emit(StatusEvent::SendFailed {
                reason: e.to_string(),
            });
            e
        })?;
        self.send_frame(&frame)
    }

    /// Write a frame without response to the resolved characteristic.
    ///
    /// Failures are reported and not retried.
    pub fn send_frame(&mut self, frame: &CentralFrame) -> Result<()> {
        let result = self.write_frame(frame);
        match &result {
            Ok(()) => {
                debug!("Sent {} bytes", frame.len());
                self.events.emit(StatusEvent::MessageSent { len: frame.len() });
            }
            Err(e) => {
                warn!("Could not send message: {}", e);
                self.events.emit(StatusEvent::SendFailed {
                    reason: e.to_string(),
                });
            }
        }
        result
    }

    fn write_frame(&mut self, frame: &CentralFrame) -> Result<()> {
        let conn = self.link.current_connection().ok_or(Error::NotConnected)?;
        let value_handle = self.discovery.resolved_handle().ok_or(Error::NotResolved)?;
        self.host
            .write_characteristic(conn, value_handle, frame.as_bytes(), WriteType::WithoutResponse)
    }

    /// Combined session state.
    pub fn state(&self) -> SessionState {
        match self.link.state() {
            ConnectionState::Idle => SessionState::Idle,
            ConnectionState::Scanning | ConnectionState::Advertising => SessionState::Scanning,
            ConnectionState::Connecting => SessionState::Connecting,
            ConnectionState::Connected => match self.discovery.state() {
                DiscoveryState::Idle => SessionState::Connected,
                DiscoveryState::DiscoveringService => SessionState::DiscoveringService,
                DiscoveryState::DiscoveringCharacteristic => {
                    SessionState::DiscoveringCharacteristic
                }
                DiscoveryState::Resolved(_) if self.subscription.is_active() => {
                    SessionState::Subscribed
                }
                DiscoveryState::Resolved(_) => SessionState::Resolved,
                DiscoveryState::Abandoned(_) => SessionState::Abandoned,
            },
        }
    }

    /// The session configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Handle of the active link, if any.
    pub fn current_connection(&self) -> Option<ConnectionHandle> {
        self.link.current_connection()
    }

    /// Value handle of the receive characteristic, once resolved.
    pub fn resolved_handle(&self) -> Option<AttributeHandle> {
        self.discovery.resolved_handle()
    }

    /// The link manager.
    pub fn link(&self) -> &LinkManager {
        &self.link
    }

    /// The discovery engine.
    pub fn discovery(&self) -> &DiscoveryEngine {
        &self.discovery
    }

    /// The current subscription, if any.
    pub fn subscription(&self) -> Option<&SubscriptionRecord> {
        self.subscription.record()
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

    fn issue_discovery(&mut self, conn: ConnectionHandle, params: DiscoverParams) {
        if let Err(e) = self.host.discover(conn, &params) {
            warn!("Discovery request refused: {}", e);
            let step = self.discovery.abandon(AbandonReason::RequestFailed);
            self.report_step(conn, step);
        }
    }

    fn report_step(&mut self, conn: ConnectionHandle, step: DiscoveryStep) {
        match step {
            DiscoveryStep::Continue | DiscoveryStep::Ignored => {}
            DiscoveryStep::Issue(params) => self.issue_discovery(conn, params),
            DiscoveryStep::Resolved(value_handle) => {
                self.events
                    .emit(StatusEvent::CharacteristicResolved { value_handle });
                self.start_subscription(conn, value_handle);
            }
            DiscoveryStep::Abandoned(reason) => {
                self.events.emit(StatusEvent::DiscoveryAbandoned { reason });
            }
        }
    }

    fn start_subscription(&mut self, conn: ConnectionHandle, value_handle: AttributeHandle) {
        if let Err(e) = self.subscription.subscribe(&mut self.host, conn, value_handle) {
            self.events.emit(StatusEvent::SubscribeFailed {
                reason: e.to_string(),
            });
        }
    }

    fn is_current(&self, handle: ConnectionHandle) -> bool {
        self.link.current_connection() == Some(handle)
    }
}

impl<H: CentralHost> RoleHandler for CentralSession<H> {
    fn role(&self) -> Role {
        Role::Central
    }

    fn on_device_found(&mut self, advertisement: &Advertisement) {
        if self.link.state() != ConnectionState::Scanning {
            return;
        }
        if !advertisement.kind.is_connectable() {
            return;
        }
        if self.config.require_advertised_service
            && !advertisement
                .services
                .contains(&self.config.descriptor.service)
        {
            return;
        }

        info!(
            "Found {} (rssi {} dBm)",
            advertisement.address, advertisement.rssi
        );

        let attempt = self
            .host
            .stop_scanning()
            .and_then(|()| self.host.connect(&advertisement.address));

        match attempt {
            Ok(handle) => {
                self.link
                    .begin_connecting(handle, advertisement.address.clone());
                self.events.emit(StatusEvent::ConnectionInitiated {
                    peer: advertisement.address.clone(),
                });
            }
            Err(e) => {
                warn!("Could not connect to {}: {}", advertisement.address, e);
                self.link.abort_connecting();
                self.events.emit(StatusEvent::ConnectFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn on_scan_failed(&mut self, reason: &str) {
        warn!("Scanning failed: {}", reason);
        self.link.stop_waiting();
        self.events.emit(StatusEvent::ScanFailed {
            reason: reason.to_string(),
        });
    }

    fn on_connected(&mut self, handle: ConnectionHandle, status: HciStatus) {
        match self.link.on_connected(handle, status) {
            ConnectOutcome::Established(conn) => {
                self.events.emit(StatusEvent::Connected { handle: conn });
                let params = self.discovery.start();
                self.events.emit(StatusEvent::DiscoveryStarted);
                self.issue_discovery(conn, params);
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
            // Not our link.
            return;
        }
        self.discovery.reset();
        self.subscription.clear();
        self.events.emit(StatusEvent::Disconnected {
            handle: released.map(|active| active.handle),
            reason,
        });
    }

    fn on_discovery_result(
        &mut self,
        handle: ConnectionHandle,
        kind: DiscoveryKind,
        attribute: Option<&DiscoveredAttribute>,
    ) {
        if !self.is_current(handle) {
            debug!("Discovery result for stale {}, ignoring", handle);
            return;
        }
        let step = self.discovery.on_result(kind, attribute);
        if let (DiscoveryStep::Issue(_), Some(service)) = (&step, attribute) {
            self.events.emit(StatusEvent::ServiceDiscovered {
                handle: service.handle,
            });
        }
        self.report_step(handle, step);
    }

    fn on_subscribe_complete(
        &mut self,
        handle: ConnectionHandle,
        status: AttStatus,
        ccc_handle: Option<AttributeHandle>,
    ) {
        if !self.is_current(handle) {
            debug!("Subscribe completion for stale {}, ignoring", handle);
            return;
        }
        match self.subscription.on_write_complete(status, ccc_handle) {
            Ok(()) => self.events.emit(StatusEvent::Subscribed {
                ccc_handle: self.subscription.record().and_then(|r| r.ccc_handle),
            }),
            Err(e) => self.events.emit(StatusEvent::SubscribeFailed {
                reason: e.to_string(),
            }),
        }
    }

    fn on_notification(
        &mut self,
        handle: ConnectionHandle,
        value_handle: AttributeHandle,
        payload: &[u8],
    ) {
        if !self.is_current(handle) {
            debug!("Notification for stale {}, ignoring", handle);
            return;
        }
        match self.subscription.on_notification(payload) {
            NotificationOutcome::Accepted(frame) => {
                let text = frame.text().into_owned();
                info!("Received: {}", text);
                self.events.emit(StatusEvent::MessageReceived { text });
            }
            NotificationOutcome::Rejected { len } => {
                self.events.emit(StatusEvent::FrameRejected {
                    len,
                    max: CENTRAL_FRAME_MAX,
                });
            }
            NotificationOutcome::Unsolicited => {
                debug!("Unsolicited notification from {}", value_handle);
            }
        }
    }

    fn on_write_failed(
        &mut self,
        handle: ConnectionHandle,
        value_handle: AttributeHandle,
        reason: &str,
    ) {
        if !self.is_current(handle) {
            debug!("Write failure for stale {}, ignoring", handle);
            return;
        }
        warn!("Write to {} failed on the link: {}", value_handle, reason);
        self.events.emit(StatusEvent::SendFailed {
            reason: format!("write to {} failed: {}", value_handle, reason),
        });
    }
}
