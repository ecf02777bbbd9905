//! btleplug-backed Central host.
//!
//! Bridges the callback-style [`CentralHost`] interface onto btleplug's async
//! API. Every request is checked synchronously, then the adapter work runs on
//! a spawned task that reports its outcome as a [`HostEvent`]. Adapter events
//! (advertisements, disconnects) are forwarded by a listener task that lives
//! as long as the host.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::characteristics::ServiceIndex;
use crate::ble::host::{
    Advertisement, AdvertisingKind, AttStatus, AttributeHandle, CentralHost, ConnectionHandle,
    DiscoverParams, HandleRange, HciStatus, HostEvent, PeerAddress, ScanMode, SubscribeParams,
};
use crate::error::errno::{EINVAL, ENOTCONN};
use crate::error::{Error, Result};
use crate::runtime::{host_event_channel, HostEventReceiver, HostEventSender};

/// One link owned by the backend.
struct Link {
    peripheral: Peripheral,
    index: ServiceIndex,
    notifications: JoinHandle<()>,
}

/// State shared between the host and its tasks.
struct Shared {
    events: HostEventSender,
    scanning: AtomicBool,
    peers: RwLock<HashMap<String, Peripheral>>,
    links: RwLock<HashMap<ConnectionHandle, Link>>,
    next_handle: Mutex<u16>,
}

impl Shared {
    fn emit(&self, event: HostEvent) {
        trace!("btleplug -> session: {:?}", event);
        let _ = self.events.send(event);
    }

    fn link_for(&self, id: &PeripheralId) -> Option<ConnectionHandle> {
        self.links
            .read()
            .iter()
            .find(|(_, link)| link.peripheral.id() == *id)
            .map(|(handle, _)| *handle)
    }
}

/// [`CentralHost`] on the first local Bluetooth adapter.
pub struct BtleplugCentral {
    adapter: Adapter,
    runtime: Handle,
    service_filter: Vec<Uuid>,
    shared: Arc<Shared>,
    listener: JoinHandle<()>,
}

impl BtleplugCentral {
    /// Open the first adapter and start listening to it.
    ///
    /// Scans only report advertisers listing one of `service_filter`; an
    /// empty filter reports every advertiser.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(service_filter: Vec<Uuid>) -> Result<(Self, HostEventReceiver)> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Self::with_adapter(adapter, service_filter).await
    }

    /// Use a specific adapter.
    pub async fn with_adapter(
        adapter: Adapter,
        service_filter: Vec<Uuid>,
    ) -> Result<(Self, HostEventReceiver)> {
        let (events, rx) = host_event_channel();
        let shared = Arc::new(Shared {
            events,
            scanning: AtomicBool::new(false),
            peers: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
            next_handle: Mutex::new(0),
        });

        let mut adapter_events = adapter.events().await.map_err(Error::Bluetooth)?;
        let listener = {
            let adapter = adapter.clone();
            let shared = shared.clone();
            tokio::spawn(async move {
                while let Some(event) = adapter_events.next().await {
                    Self::handle_event(event, &adapter, &shared).await;
                }
                debug!("Adapter event stream ended");
            })
        };

        Ok((
            Self {
                adapter,
                runtime: Handle::current(),
                service_filter,
                shared,
                listener,
            },
            rx,
        ))
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Disconnect every link and stop scanning.
    pub async fn shutdown(&self) -> Result<()> {
        self.shared.scanning.store(false, Ordering::SeqCst);
        let _ = self.adapter.stop_scan().await;

        let links: Vec<(ConnectionHandle, Link)> = self.shared.links.write().drain().collect();
        for (handle, link) in links {
            link.notifications.abort();
            if let Err(e) = link.peripheral.disconnect().await {
                warn!("Failed to disconnect {}: {}", handle, e);
            }
            self.shared.emit(HostEvent::Disconnected {
                handle,
                reason: HciStatus::LOCAL_HOST_TERMINATED,
            });
        }
        Ok(())
    }

    fn allocate_handle(&self) -> ConnectionHandle {
        let mut next = self.shared.next_handle.lock();
        *next = next.wrapping_add(1);
        ConnectionHandle(*next)
    }

    fn with_link<T>(
        &self,
        conn: ConnectionHandle,
        operation: &'static str,
        f: impl FnOnce(&Link) -> Result<T>,
    ) -> Result<T> {
        let links = self.shared.links.read();
        let link = links.get(&conn).ok_or(Error::host(operation, ENOTCONN))?;
        f(link)
    }

    async fn handle_event(event: CentralEvent, adapter: &Adapter, shared: &Arc<Shared>) {
        match event {
            CentralEvent::DeviceDiscovered(id)
            | CentralEvent::DeviceUpdated(id)
            | CentralEvent::ServicesAdvertisement { id, .. } => {
                if shared.scanning.load(Ordering::SeqCst) {
                    Self::report_advertiser(adapter, id, shared).await;
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let Some(handle) = shared.link_for(&id) else {
                    trace!("Untracked device disconnected: {:?}", id);
                    return;
                };
                if let Some(link) = shared.links.write().remove(&handle) {
                    link.notifications.abort();
                }
                info!("Link {} dropped by {:?}", handle, id);
                shared.emit(HostEvent::Disconnected {
                    handle,
                    reason: HciStatus::REMOTE_USER_TERMINATED,
                });
            }
            CentralEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
            }
            _ => {}
        }
    }

    async fn report_advertiser(adapter: &Adapter, id: PeripheralId, shared: &Arc<Shared>) {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        let address = id.to_string();
        shared.peers.write().insert(address.clone(), peripheral);

        shared.emit(HostEvent::DeviceFound(Advertisement {
            address: PeerAddress(address),
            rssi: properties.rssi.unwrap_or(i16::MIN),
            // btleplug only reports connectable advertisers on most platforms.
            kind: AdvertisingKind::ConnectableUndirected,
            services: properties.services,
            local_name: properties.local_name,
        }));
    }
}

impl CentralHost for BtleplugCentral {
    fn start_scanning(&mut self, mode: ScanMode) -> Result<()> {
        if mode == ScanMode::Active {
            debug!("btleplug does not select the scan mode; scanning with platform default");
        }

        self.shared.scanning.store(true, Ordering::SeqCst);
        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        let filter = ScanFilter {
            services: self.service_filter.clone(),
        };

        self.runtime.spawn(async move {
            info!("Starting BLE scan");
            if let Err(e) = adapter.start_scan(filter).await {
                error!("Failed to start scan: {}", e);
                shared.scanning.store(false, Ordering::SeqCst);
                shared.emit(HostEvent::ScanFailed {
                    reason: e.to_string(),
                });
            }
        });
        Ok(())
    }

    fn stop_scanning(&mut self) -> Result<()> {
        self.shared.scanning.store(false, Ordering::SeqCst);
        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        self.runtime.spawn(async move {
            info!("Stopping BLE scan");
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
                shared.emit(HostEvent::ScanFailed {
                    reason: format!("stop scan: {}", e),
                });
            }
        });
        Ok(())
    }

    fn connect(&mut self, address: &PeerAddress) -> Result<ConnectionHandle> {
        let peripheral = self
            .shared
            .peers
            .read()
            .get(&address.0)
            .cloned()
            .ok_or(Error::host("connect", EINVAL))?;

        let handle = self.allocate_handle();
        let shared = self.shared.clone();

        self.runtime.spawn(async move {
            let established = async {
                peripheral.connect().await?;
                peripheral.discover_services().await?;
                peripheral.notifications().await
            }
            .await;

            let notifications = match established {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Connection {} failed: {}", handle, e);
                    let _ = peripheral.disconnect().await;
                    shared.emit(HostEvent::Connected {
                        handle,
                        status: HciStatus::CONNECTION_FAILED_TO_ESTABLISH,
                    });
                    return;
                }
            };

            let index = ServiceIndex::build(&peripheral.services());
            let forwarder = {
                let shared = shared.clone();
                let index = index.clone();
                tokio::spawn(async move {
                    let mut notifications = notifications;
                    while let Some(notification) = notifications.next().await {
                        let Some(value_handle) = index.value_handle_of(&notification.uuid) else {
                            trace!("Notification from unindexed {}", notification.uuid);
                            continue;
                        };
                        shared.emit(HostEvent::Notification {
                            handle,
                            value_handle,
                            payload: Bytes::from(notification.value),
                        });
                    }
                    debug!("Notification stream for {} ended", handle);
                })
            };

            shared.links.write().insert(
                handle,
                Link {
                    peripheral,
                    index,
                    notifications: forwarder,
                },
            );
            shared.emit(HostEvent::Connected {
                handle,
                status: HciStatus::SUCCESS,
            });
        });

        Ok(handle)
    }

    fn discover(&mut self, conn: ConnectionHandle, params: &DiscoverParams) -> Result<()> {
        let found = self.with_link(conn, "discover", |link| {
            Ok(link.index.database().discover(params))
        })?;

        for attribute in found {
            self.shared.emit(HostEvent::DiscoveryResult {
                handle: conn,
                kind: params.kind,
                attribute: Some(attribute),
            });
        }
        self.shared.emit(HostEvent::DiscoveryResult {
            handle: conn,
            kind: params.kind,
            attribute: None,
        });
        Ok(())
    }

    fn subscribe(&mut self, conn: ConnectionHandle, params: &SubscribeParams) -> Result<()> {
        let located = self.with_link(conn, "subscribe", |link| {
            let db = link.index.database();
            let found = match params.ccc_handle {
                Some(handle) => db.get(handle).map(|entry| (entry.handle, entry.uuid)),
                None => params.value_handle.next().and_then(|start| {
                    db.client_config_in(HandleRange {
                        start,
                        end: params.end_handle,
                    })
                }),
            };
            Ok(found.and_then(|(ccc, uuid)| {
                link.index
                    .characteristic_by_uuid(&uuid)
                    .map(|characteristic| (ccc, characteristic.clone(), link.peripheral.clone()))
            }))
        })?;

        let Some((ccc, characteristic, peripheral)) = located else {
            self.shared.emit(HostEvent::SubscribeComplete {
                handle: conn,
                status: AttStatus::ATTRIBUTE_NOT_FOUND,
                ccc_handle: None,
            });
            return Ok(());
        };

        let enable = params.value.bits() != 0;
        let shared = self.shared.clone();
        self.runtime.spawn(async move {
            let result = if enable {
                peripheral.subscribe(&characteristic).await
            } else {
                peripheral.unsubscribe(&characteristic).await
            };
            let status = match result {
                Ok(()) => AttStatus::SUCCESS,
                Err(e) => {
                    warn!("CCC write for {} failed: {}", characteristic.uuid, e);
                    AttStatus::UNLIKELY_ERROR
                }
            };
            shared.emit(HostEvent::SubscribeComplete {
                handle: conn,
                status,
                ccc_handle: Some(ccc),
            });
        });
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        conn: ConnectionHandle,
        value_handle: AttributeHandle,
        payload: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        let (peripheral, characteristic) =
            self.with_link(conn, "write_characteristic", |link| {
                let characteristic = link
                    .index
                    .characteristic(value_handle)
                    .cloned()
                    .ok_or(Error::host("write_characteristic", EINVAL))?;
                Ok((link.peripheral.clone(), characteristic))
            })?;

        let data = payload.to_vec();
        let shared = self.shared.clone();
        self.runtime.spawn(async move {
            match peripheral.write(&characteristic, &data, write_type).await {
                Ok(()) => trace!("Wrote {} bytes to {}", data.len(), characteristic.uuid),
                Err(e) => {
                    warn!("Write to {} failed: {}", characteristic.uuid, e);
                    shared.emit(HostEvent::WriteFailed {
                        handle: conn,
                        value_handle,
                        reason: e.to_string(),
                    });
                }
            }
        });
        Ok(())
    }
}

impl Drop for BtleplugCentral {
    fn drop(&mut self) {
        self.shared.scanning.store(false, Ordering::SeqCst);
        self.listener.abort();
    }
}
