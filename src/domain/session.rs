//! Connection session state machine.
//!
//! One `ConnectionSession` covers a single attempt to use a single helmet:
//! created on a connect request, destroyed when the link ends. The states
//! mirror the three asynchronous callbacks the platform delivers out of
//! band (link state change, service discovery completion, characteristic
//! I/O), which lets the manager drop stale or out-of-order hardware events
//! instead of acting on them.

use crate::domain::models::{DiscoveredDevice, ServiceHandle, SessionState};
use crate::error::LinkError;

pub struct ConnectionSession {
    device: DiscoveredDevice,
    state: SessionState,
    handle: Option<ServiceHandle>,
    last_error: Option<LinkError>,
}

impl ConnectionSession {
    pub fn new(device: DiscoveredDevice) -> Self {
        Self {
            device,
            state: SessionState::Idle,
            handle: None,
            last_error: None,
        }
    }

    pub fn device(&self) -> &DiscoveredDevice {
        &self.device
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> Option<&ServiceHandle> {
        self.handle.as_ref()
    }

    pub fn last_error(&self) -> Option<&LinkError> {
        self.last_error.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn matches(&self, address: &str) -> bool {
        self.device.address == address
    }

    /// Idle → Connecting, when the connect request is issued.
    pub fn begin_connect(&mut self) -> bool {
        if self.state != SessionState::Idle {
            return false;
        }
        self.state = SessionState::Connecting;
        true
    }

    /// Connecting → ServiceDiscovery, on the platform link-up callback.
    pub fn link_established(&mut self) -> bool {
        if self.state != SessionState::Connecting {
            return false;
        }
        self.state = SessionState::ServiceDiscovery;
        true
    }

    /// ServiceDiscovery → Ready, once the helmet service is negotiated.
    /// The session takes ownership of the handle until it is torn down.
    pub fn service_resolved(&mut self, handle: ServiceHandle) -> bool {
        if self.state != SessionState::ServiceDiscovery {
            return false;
        }
        self.handle = Some(handle);
        self.state = SessionState::Ready;
        true
    }

    /// Any state → Disconnected with an error. Returns the handle so the
    /// caller can release it; the session is spent afterwards.
    pub fn fail(&mut self, error: LinkError) -> Option<ServiceHandle> {
        self.state = SessionState::Disconnected;
        self.last_error = Some(error);
        self.handle.take()
    }

    /// Any state → Disconnected without an error: explicit disconnect,
    /// supersession by a newer connect, or manager shutdown. Returns the
    /// handle for release.
    pub fn close(&mut self) -> Option<ServiceHandle> {
        self.state = SessionState::Disconnected;
        self.handle.take()
    }
}
