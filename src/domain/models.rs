use uuid::Uuid;

use crate::error::LinkError;

/// A peripheral seen during the current scan session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub name: String,
    /// Service UUIDs from the advertisement; often empty until connected.
    pub service_uuids: Vec<Uuid>,
    /// Stable hardware identifier used to address the peripheral.
    pub address: String,
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    /// Scan-session identity. Advertised service lists and signal strength
    /// vary between sightings of the same helmet, so only the (name,
    /// address) pair counts.
    pub fn same_identity(&self, other: &Self) -> bool {
        self.name == other.name && self.address == other.address
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    Outbound,
    Inbound,
}

/// Opaque bytes exchanged over the helmet characteristic. The manager
/// never interprets payloads in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicMessage {
    pub direction: MessageDirection,
    pub payload: Vec<u8>,
}

impl CharacteristicMessage {
    pub fn inbound(payload: Vec<u8>) -> Self {
        Self {
            direction: MessageDirection::Inbound,
            payload,
        }
    }

    pub fn outbound(payload: Vec<u8>) -> Self {
        Self {
            direction: MessageDirection::Outbound,
            payload,
        }
    }
}

/// Opaque handle to the negotiated helmet service on a connected
/// peripheral. Owned by the manager for the session's lifetime and
/// released on every path into `Disconnected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    address: String,
    service: Uuid,
    characteristic: Uuid,
}

impl ServiceHandle {
    pub fn new(address: impl Into<String>, service: Uuid, characteristic: Uuid) -> Self {
        Self {
            address: address.into(),
            service,
            characteristic,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn service(&self) -> Uuid {
        self.service
    }

    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    ServiceDiscovery,
    Ready,
    Disconnected,
}

/// Requests accepted by the manager worker.
#[derive(Debug, Clone)]
pub enum HelmetCommand {
    StartScan,
    StopScan,
    Connect(DiscoveredDevice),
    Disconnect,
    Write(Vec<u8>),
}

/// Events published by the manager.
#[derive(Debug, Clone)]
pub enum HelmetEvent {
    DeviceDiscovered(DiscoveredDevice),
    ScanFailed(LinkError),
    StateChanged {
        state: SessionState,
        error: Option<LinkError>,
    },
    Inbound(CharacteristicMessage),
    WriteOutcome(Result<(), LinkError>),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
