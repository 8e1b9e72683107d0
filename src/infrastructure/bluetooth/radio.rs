//! Platform Radio Module
//!
//! The manager never touches the Bluetooth stack directly: it owns a
//! [`HelmetRadio`] injected at construction. Radio methods only *initiate*
//! work; completions arrive as [`RadioEvent`]s on the channel handed to the
//! implementation, one event per asynchronous platform callback. That keeps
//! the manager's worker loop responsive and lets tests script the hardware.
//!
//! [`SystemRadio`] is the production implementation on top of btleplug.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::{DiscoveredDevice, ServiceHandle};
use crate::error::LinkError;

/// Out-of-band completions from the platform Bluetooth stack.
#[derive(Debug)]
pub enum RadioEvent {
    /// Advertisement from a named peripheral.
    DeviceSeen(DiscoveredDevice),
    /// The scan died underneath us.
    ScanFailed(LinkError),
    /// Link to `address` is up.
    LinkUp { address: String },
    /// The connect attempt for `address` failed outright.
    ConnectFailed { address: String, error: LinkError },
    /// Link to `address` dropped.
    LinkDown { address: String },
    /// Service negotiation on `address` finished.
    ServicesResolved {
        address: String,
        result: Result<ServiceHandle, LinkError>,
    },
    /// Outcome of a write previously initiated on `address`.
    WriteAck {
        address: String,
        result: Result<(), LinkError>,
    },
    /// Notification payload pushed by `address`.
    Inbound { address: String, payload: Vec<u8> },
}

pub type RadioEventSender = mpsc::UnboundedSender<RadioEvent>;
pub type RadioEventReceiver = mpsc::UnboundedReceiver<RadioEvent>;

/// The injected platform resource (never an ambient/global lookup).
///
/// Implementations must be best-effort on `release`/`disconnect`: both are
/// called on every teardown path and may race the remote side going away.
#[async_trait]
pub trait HelmetRadio: Send {
    async fn start_scan(&mut self) -> Result<(), LinkError>;
    async fn stop_scan(&mut self) -> Result<(), LinkError>;
    /// Initiate a connection; completion arrives as `LinkUp` or
    /// `ConnectFailed`.
    async fn connect(&mut self, address: &str) -> Result<(), LinkError>;
    /// Initiate service negotiation; completion arrives as
    /// `ServicesResolved`.
    async fn resolve_service(&mut self, address: &str) -> Result<(), LinkError>;
    /// Initiate a write; the acknowledgment arrives as `WriteAck`.
    async fn write(&mut self, handle: &ServiceHandle, payload: &[u8]) -> Result<(), LinkError>;
    /// Release a negotiated handle: drop the subscription and the link.
    async fn release(&mut self, handle: ServiceHandle);
    /// Best-effort teardown for a session that never negotiated a handle.
    async fn disconnect(&mut self, address: &str);
}

/// btleplug-backed radio.
pub struct SystemRadio {
    adapter: Adapter,
    events: RadioEventSender,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    central_pump: Option<JoinHandle<()>>,
    notify_pumps: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    peripherals: HashMap<String, Peripheral>,
}

impl SystemRadio {
    pub fn new(
        adapter: Adapter,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        events: RadioEventSender,
    ) -> Self {
        Self {
            adapter,
            events,
            service_uuid,
            characteristic_uuid,
            central_pump: None,
            notify_pumps: Arc::new(Mutex::new(HashMap::new())),
            peripherals: HashMap::new(),
        }
    }

    /// Pick the machine's first Bluetooth adapter.
    pub async fn first_adapter() -> Result<Adapter, LinkError> {
        let manager = Manager::new()
            .await
            .map_err(|_| LinkError::AdapterUnavailable)?;
        let adapters = manager.adapters().await.map_err(adapter_error)?;
        adapters
            .into_iter()
            .next()
            .ok_or(LinkError::AdapterUnavailable)
    }

    /// One long-lived task translating central events (advertisements,
    /// link drops) into `RadioEvent`s. Started lazily because the stream
    /// can only be obtained asynchronously.
    async fn ensure_central_pump(&mut self) -> Result<(), LinkError> {
        if self.central_pump.is_some() {
            return Ok(());
        }
        let central_events = self.adapter.events().await.map_err(adapter_error)?;
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        self.central_pump = Some(tokio::spawn(pump_central_events(
            adapter,
            central_events,
            events,
        )));
        Ok(())
    }

    /// Look up (and cache) the platform peripheral for a scanned address.
    async fn peripheral(&mut self, address: &str) -> Result<Peripheral, LinkError> {
        if let Some(peripheral) = self.peripherals.get(address) {
            return Ok(peripheral.clone());
        }
        let peripherals = self.adapter.peripherals().await.map_err(adapter_error)?;
        for peripheral in peripherals {
            if peripheral.address().to_string() == address {
                self.peripherals
                    .insert(address.to_string(), peripheral.clone());
                return Ok(peripheral);
            }
        }
        Err(LinkError::ConnectFailed(format!(
            "{address} is not in the scan results"
        )))
    }

    fn abort_notify_pump(&self, address: &str) {
        let pump = self.notify_pumps.lock().unwrap().remove(address);
        if let Some(pump) = pump {
            pump.abort();
        }
    }

    fn find_characteristic(
        peripheral: &Peripheral,
        handle: &ServiceHandle,
    ) -> Option<btleplug::api::Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == handle.service() && c.uuid == handle.characteristic())
    }
}

#[async_trait]
impl HelmetRadio for SystemRadio {
    async fn start_scan(&mut self) -> Result<(), LinkError> {
        self.ensure_central_pump().await?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(adapter_error)
    }

    async fn stop_scan(&mut self) -> Result<(), LinkError> {
        // the central pump stays up: it also carries link-down events
        self.adapter.stop_scan().await.map_err(adapter_error)
    }

    async fn connect(&mut self, address: &str) -> Result<(), LinkError> {
        self.ensure_central_pump().await?;
        let peripheral = self.peripheral(address).await?;
        let events = self.events.clone();
        let address = address.to_string();
        tokio::spawn(async move {
            match peripheral.connect().await {
                Ok(()) => {
                    let _ = events.send(RadioEvent::LinkUp { address });
                }
                Err(error) => {
                    let _ = events.send(RadioEvent::ConnectFailed {
                        address,
                        error: LinkError::ConnectFailed(error.to_string()),
                    });
                }
            }
        });
        Ok(())
    }

    async fn resolve_service(&mut self, address: &str) -> Result<(), LinkError> {
        let peripheral = self.peripheral(address).await?;
        let events = self.events.clone();
        let pumps = Arc::clone(&self.notify_pumps);
        let service_uuid = self.service_uuid;
        let characteristic_uuid = self.characteristic_uuid;
        let address = address.to_string();
        tokio::spawn(async move {
            // anything that keeps us from the expected service/notify setup
            // counts as the service not being there
            let negotiated = async {
                peripheral
                    .discover_services()
                    .await
                    .map_err(|_| LinkError::ServiceNotFound)?;
                let characteristic = peripheral
                    .characteristics()
                    .into_iter()
                    .find(|c| c.service_uuid == service_uuid && c.uuid == characteristic_uuid)
                    .ok_or(LinkError::ServiceNotFound)?;
                peripheral
                    .subscribe(&characteristic)
                    .await
                    .map_err(|_| LinkError::ServiceNotFound)?;
                peripheral
                    .notifications()
                    .await
                    .map_err(|_| LinkError::ServiceNotFound)
            }
            .await;

            let result = match negotiated {
                Ok(notifications) => {
                    let pump = tokio::spawn(pump_notifications(
                        notifications,
                        characteristic_uuid,
                        address.clone(),
                        events.clone(),
                    ));
                    pumps.lock().unwrap().insert(address.clone(), pump);
                    Ok(ServiceHandle::new(
                        address.clone(),
                        service_uuid,
                        characteristic_uuid,
                    ))
                }
                Err(error) => Err(error),
            };
            let _ = events.send(RadioEvent::ServicesResolved { address, result });
        });
        Ok(())
    }

    async fn write(&mut self, handle: &ServiceHandle, payload: &[u8]) -> Result<(), LinkError> {
        let peripheral = self.peripheral(handle.address()).await?;
        let characteristic = Self::find_characteristic(&peripheral, handle).ok_or_else(|| {
            LinkError::TransportError("characteristic is no longer present".to_string())
        })?;
        let events = self.events.clone();
        let address = handle.address().to_string();
        let payload = payload.to_vec();
        tokio::spawn(async move {
            let result = peripheral
                .write(&characteristic, &payload, WriteType::WithResponse)
                .await
                .map_err(|error| LinkError::TransportError(error.to_string()));
            let _ = events.send(RadioEvent::WriteAck { address, result });
        });
        Ok(())
    }

    async fn release(&mut self, handle: ServiceHandle) {
        self.abort_notify_pump(handle.address());
        let Ok(peripheral) = self.peripheral(handle.address()).await else {
            return;
        };
        if let Some(characteristic) = Self::find_characteristic(&peripheral, &handle) {
            if let Err(error) = peripheral.unsubscribe(&characteristic).await {
                debug!(%error, "unsubscribe failed during release");
            }
        }
        if let Err(error) = peripheral.disconnect().await {
            debug!(%error, "disconnect failed during release");
        }
    }

    async fn disconnect(&mut self, address: &str) {
        self.abort_notify_pump(address);
        let Ok(peripheral) = self.peripheral(address).await else {
            return;
        };
        if let Err(error) = peripheral.disconnect().await {
            debug!(%error, "disconnect failed");
        }
    }
}

impl Drop for SystemRadio {
    fn drop(&mut self) {
        if let Some(pump) = self.central_pump.take() {
            pump.abort();
        }
        for (_, pump) in self.notify_pumps.lock().unwrap().drain() {
            pump.abort();
        }
    }
}

async fn pump_central_events(
    adapter: Adapter,
    mut central_events: impl Stream<Item = CentralEvent> + Unpin,
    events: RadioEventSender,
) {
    while let Some(event) = central_events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(properties)) = peripheral.properties().await else {
                    continue;
                };
                // helmets always advertise a name; anonymous results are
                // useless in a picker
                let Some(name) = properties.local_name else {
                    continue;
                };
                let device = DiscoveredDevice {
                    name,
                    service_uuids: properties.services,
                    address: peripheral.address().to_string(),
                    rssi: properties.rssi,
                };
                if events.send(RadioEvent::DeviceSeen(device)).is_err() {
                    return;
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let address = peripheral.address().to_string();
                if events.send(RadioEvent::LinkDown { address }).is_err() {
                    return;
                }
            }
            _ => {}
        }
    }
    // the stream only ends when the adapter itself goes away
    warn!("central event stream ended");
    let _ = events.send(RadioEvent::ScanFailed(LinkError::AdapterUnavailable));
}

async fn pump_notifications(
    mut notifications: impl Stream<Item = btleplug::api::ValueNotification> + Unpin,
    characteristic_uuid: Uuid,
    address: String,
    events: RadioEventSender,
) {
    while let Some(notification) = notifications.next().await {
        if notification.uuid != characteristic_uuid {
            continue;
        }
        let inbound = RadioEvent::Inbound {
            address: address.clone(),
            payload: notification.value,
        };
        if events.send(inbound).is_err() {
            return;
        }
    }
    debug!(%address, "notification stream ended");
}

fn adapter_error(error: btleplug::Error) -> LinkError {
    match error {
        btleplug::Error::PermissionDenied => LinkError::PermissionDenied,
        _ => LinkError::AdapterUnavailable,
    }
}
