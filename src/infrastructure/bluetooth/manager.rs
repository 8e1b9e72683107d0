//! Helmet Connection Manager
//!
//! `HelmetManager` is the public entry point: commands go in over a
//! channel, [`HelmetEvent`]s come out, and one worker task owns every piece
//! of mutable state (scan set, session, radio). Caller commands and
//! hardware callbacks are serialized onto that task, so session state needs
//! no locking and stale platform events are dropped instead of acted upon.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::{
    CharacteristicMessage, DiscoveredDevice, HelmetCommand, HelmetEvent, MessageSeverity,
    ServiceHandle, SessionState, StatusMessage,
};
use crate::domain::session::ConnectionSession;
use crate::domain::settings::Settings;
use crate::error::LinkError;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::radio::{HelmetRadio, RadioEvent, RadioEventReceiver};
use crate::infrastructure::bluetooth::scanner::ScanSession;

/// Well-known identifiers and policy the manager is configured with.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    /// Case-sensitive name prefix applied to scan results; `None` surfaces
    /// every device.
    pub name_prefix: Option<String>,
    /// Optional deadline for a connect attempt to reach `Ready`.
    pub connect_timeout: Option<Duration>,
}

impl LinkConfig {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self {
            service_uuid: protocol::parse_uuid(&settings.helmet_service_uuid)?,
            characteristic_uuid: protocol::parse_uuid(&settings.helmet_data_char_uuid)?,
            name_prefix: if settings.show_all_devices {
                None
            } else {
                Some(settings.device_name_prefix.clone())
            },
            connect_timeout: settings.connect_timeout_ms.map(Duration::from_millis),
        })
    }
}

/// Handle to the manager worker. All methods are non-blocking sends;
/// results surface on the event channel.
pub struct HelmetManager {
    cmd_tx: mpsc::UnboundedSender<HelmetCommand>,
    worker: JoinHandle<()>,
}

impl HelmetManager {
    /// Spawn the worker. `radio` initiates platform work and reports
    /// completions on `radio_rx`; everything observable is emitted on
    /// `events`.
    pub fn new<R>(
        radio: R,
        radio_rx: RadioEventReceiver,
        config: LinkConfig,
        events: mpsc::UnboundedSender<HelmetEvent>,
    ) -> Self
    where
        R: HelmetRadio + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(
            LinkWorker {
                radio,
                radio_rx,
                cmd_rx,
                events,
                config,
                scan: None,
                session: None,
                deadline: None,
            }
            .run(),
        );
        Self { cmd_tx, worker }
    }

    pub fn start_scan(&self) {
        self.send(HelmetCommand::StartScan);
    }

    pub fn stop_scan(&self) {
        self.send(HelmetCommand::StopScan);
    }

    pub fn connect(&self, device: DiscoveredDevice) {
        self.send(HelmetCommand::Connect(device));
    }

    pub fn disconnect(&self) {
        self.send(HelmetCommand::Disconnect);
    }

    pub fn write(&self, payload: Vec<u8>) {
        self.send(HelmetCommand::Write(payload));
    }

    fn send(&self, cmd: HelmetCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            warn!("helmet worker is gone; command dropped");
        }
    }

    /// Tear down the worker after draining queued commands; any live
    /// session releases its handle on the way out.
    pub async fn shutdown(self) {
        let Self { cmd_tx, worker } = self;
        drop(cmd_tx);
        let _ = worker.await;
    }
}

struct LinkWorker<R> {
    radio: R,
    radio_rx: RadioEventReceiver,
    cmd_rx: mpsc::UnboundedReceiver<HelmetCommand>,
    events: mpsc::UnboundedSender<HelmetEvent>,
    config: LinkConfig,
    scan: Option<ScanSession>,
    session: Option<ConnectionSession>,
    deadline: Option<Instant>,
}

impl<R: HelmetRadio> LinkWorker<R> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                event = self.radio_rx.recv() => match event {
                    Some(event) => self.handle_radio_event(event).await,
                    None => break,
                },
                _ = Self::expired(self.deadline), if self.deadline.is_some() => {
                    self.handle_deadline().await;
                }
            }
        }
        // shutdown: the handle must not outlive the worker
        self.teardown_session(None).await;
        if self.scan.take().is_some() {
            let _ = self.radio.stop_scan().await;
        }
    }

    async fn expired(deadline: Option<Instant>) {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }

    async fn handle_command(&mut self, cmd: HelmetCommand) {
        match cmd {
            HelmetCommand::StartScan => self.start_scan().await,
            HelmetCommand::StopScan => self.stop_scan().await,
            HelmetCommand::Connect(device) => self.connect(device).await,
            HelmetCommand::Disconnect => {
                if self.session.is_some() {
                    self.teardown_session(None).await;
                    self.log("Disconnected from helmet", MessageSeverity::Info);
                }
            }
            HelmetCommand::Write(payload) => self.write(payload).await,
        }
    }

    async fn handle_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::DeviceSeen(device) => self.device_seen(device),
            RadioEvent::ScanFailed(error) => {
                warn!(%error, "scan aborted by the platform");
                if self.scan.take().is_some() {
                    self.log(&format!("Scan failed: {error}"), MessageSeverity::Error);
                    self.emit(HelmetEvent::ScanFailed(error));
                }
            }
            RadioEvent::LinkUp { address } => self.link_up(address).await,
            RadioEvent::ConnectFailed { address, error } => {
                if self.session_matches(&address, SessionState::Connecting) {
                    self.fail_session(error).await;
                } else {
                    debug!(%address, "stale connect failure ignored");
                }
            }
            RadioEvent::LinkDown { address } => self.link_down(address).await,
            RadioEvent::ServicesResolved { address, result } => {
                self.services_resolved(address, result).await;
            }
            RadioEvent::WriteAck { address, result } => {
                if self.session_matches(&address, SessionState::Ready) {
                    if let Err(error) = &result {
                        warn!(%error, "helmet rejected write");
                    }
                    self.emit(HelmetEvent::WriteOutcome(result));
                } else {
                    debug!(%address, "write ack after session ended; dropped");
                }
            }
            RadioEvent::Inbound { address, payload } => {
                if self.session_matches(&address, SessionState::Ready) {
                    self.emit(HelmetEvent::Inbound(CharacteristicMessage::inbound(payload)));
                } else {
                    debug!(%address, "notification after session ended; dropped");
                }
            }
        }
    }

    async fn start_scan(&mut self) {
        // each start clears prior results
        self.scan = Some(ScanSession::new(self.config.name_prefix.clone()));
        info!("starting helmet scan");
        self.log("Scanning for helmets...", MessageSeverity::Info);
        if let Err(error) = self.radio.start_scan().await {
            warn!(%error, "scan failed to start");
            self.scan = None;
            self.log(&format!("Scan failed: {error}"), MessageSeverity::Error);
            self.emit(HelmetEvent::ScanFailed(error));
        }
    }

    async fn stop_scan(&mut self) {
        // idempotent: nothing to do without an active scan
        if self.scan.take().is_none() {
            return;
        }
        info!("stopping helmet scan");
        if let Err(error) = self.radio.stop_scan().await {
            warn!(%error, "scan failed to stop");
        }
        self.log("Scan stopped.", MessageSeverity::Info);
    }

    fn device_seen(&mut self, device: DiscoveredDevice) {
        let Some(scan) = self.scan.as_mut() else {
            // advertisement after stop
            return;
        };
        if !scan.observe(device.clone()) {
            return;
        }
        if scan.filter_matches(&device) {
            debug!(name = %device.name, address = %device.address, "helmet discovered");
            self.emit(HelmetEvent::DeviceDiscovered(device));
        }
    }

    async fn connect(&mut self, device: DiscoveredDevice) {
        if self.session.is_some() {
            // a newer connect supersedes whatever is in flight
            debug!("superseding in-flight session");
            self.log("Previous helmet session superseded", MessageSeverity::Warning);
            self.teardown_session(None).await;
        }
        info!(address = %device.address, name = %device.name, "connecting to helmet");
        self.log(
            &format!("Connecting to {}...", device.name),
            MessageSeverity::Info,
        );

        let mut session = ConnectionSession::new(device);
        session.begin_connect();
        let address = session.device().address.clone();
        self.session = Some(session);
        self.deadline = self.config.connect_timeout.map(|t| Instant::now() + t);
        self.emit_state(SessionState::Connecting, None);

        if let Err(error) = self.radio.connect(&address).await {
            self.fail_session(error).await;
        }
    }

    async fn link_up(&mut self, address: String) {
        if !self.session_matches(&address, SessionState::Connecting) {
            debug!(%address, "stale link-up ignored");
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.link_established();
        }
        info!(%address, "link up, negotiating helmet service");
        self.emit_state(SessionState::ServiceDiscovery, None);
        if let Err(error) = self.radio.resolve_service(&address).await {
            self.fail_session(error).await;
        }
    }

    async fn link_down(&mut self, address: String) {
        let Some(state) = self
            .session
            .as_ref()
            .filter(|session| session.matches(&address))
            .map(|session| session.state())
        else {
            debug!(%address, "stale link-down ignored");
            return;
        };
        info!(%address, "helmet link down");
        if state == SessionState::Connecting {
            self.fail_session(LinkError::ConnectFailed(
                "link dropped before it was established".to_string(),
            ))
            .await;
        } else {
            self.log("Helmet link lost", MessageSeverity::Warning);
            self.teardown_session(None).await;
        }
    }

    async fn services_resolved(
        &mut self,
        address: String,
        result: Result<ServiceHandle, LinkError>,
    ) {
        if !self.session_matches(&address, SessionState::ServiceDiscovery) {
            // a superseded session's discovery can still land here; its
            // handle must not leak
            if let Ok(handle) = result {
                debug!(%address, "releasing handle of a dead session");
                self.radio.release(handle).await;
            }
            return;
        }
        match result {
            Ok(handle) => {
                if let Some(session) = self.session.as_mut() {
                    session.service_resolved(handle);
                }
                self.deadline = None;
                info!(%address, "helmet session ready");
                self.log("Helmet connected!", MessageSeverity::Success);
                self.emit_state(SessionState::Ready, None);
            }
            Err(error) => {
                warn!(%address, %error, "service negotiation failed");
                self.fail_session(error).await;
            }
        }
    }

    async fn write(&mut self, payload: Vec<u8>) {
        let handle = match &self.session {
            Some(session) if session.is_ready() => session.handle().cloned(),
            _ => None,
        };
        let Some(handle) = handle else {
            // gate before any transport I/O happens
            self.emit(HelmetEvent::WriteOutcome(Err(LinkError::NotReady)));
            return;
        };
        debug!(len = payload.len(), "writing to helmet");
        if let Err(error) = self.radio.write(&handle, &payload).await {
            self.emit(HelmetEvent::WriteOutcome(Err(error)));
        }
    }

    async fn handle_deadline(&mut self) {
        self.deadline = None;
        let pending = self.session.as_ref().is_some_and(|session| {
            matches!(
                session.state(),
                SessionState::Connecting | SessionState::ServiceDiscovery
            )
        });
        if pending {
            warn!("connect deadline elapsed");
            self.fail_session(LinkError::Timeout).await;
        }
    }

    async fn fail_session(&mut self, error: LinkError) {
        self.log(
            &format!("Helmet session failed: {error}"),
            MessageSeverity::Error,
        );
        self.teardown_session(Some(error)).await;
    }

    /// Tear down the live session, always releasing whatever was acquired.
    async fn teardown_session(&mut self, error: Option<LinkError>) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.deadline = None;
        let address = session.device().address.clone();
        let handle = match error.clone() {
            Some(error) => session.fail(error),
            None => session.close(),
        };
        match handle {
            Some(handle) => self.radio.release(handle).await,
            // no handle yet: cancel whatever the platform has in flight
            None => self.radio.disconnect(&address).await,
        }
        self.emit(HelmetEvent::StateChanged {
            state: SessionState::Disconnected,
            error,
        });
    }

    fn session_matches(&self, address: &str, state: SessionState) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.matches(address) && session.state() == state)
    }

    fn emit_state(&self, state: SessionState, error: Option<LinkError>) {
        self.emit(HelmetEvent::StateChanged { state, error });
    }

    fn emit(&self, event: HelmetEvent) {
        let _ = self.events.send(event);
    }

    fn log(&self, message: &str, severity: MessageSeverity) {
        self.emit(HelmetEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::radio::RadioEventSender;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum RadioOp {
        StartScan,
        StopScan,
        Connect(String),
        Resolve(String),
        Write(String, Vec<u8>),
        Release(String),
        Disconnect(String),
    }

    struct MockRadio {
        ops: Arc<Mutex<Vec<RadioOp>>>,
        scan_result: Result<(), LinkError>,
    }

    impl MockRadio {
        fn record(&self, op: RadioOp) {
            self.ops.lock().unwrap().push(op);
        }
    }

    #[async_trait]
    impl HelmetRadio for MockRadio {
        async fn start_scan(&mut self) -> Result<(), LinkError> {
            self.record(RadioOp::StartScan);
            self.scan_result.clone()
        }

        async fn stop_scan(&mut self) -> Result<(), LinkError> {
            self.record(RadioOp::StopScan);
            Ok(())
        }

        async fn connect(&mut self, address: &str) -> Result<(), LinkError> {
            self.record(RadioOp::Connect(address.to_string()));
            Ok(())
        }

        async fn resolve_service(&mut self, address: &str) -> Result<(), LinkError> {
            self.record(RadioOp::Resolve(address.to_string()));
            Ok(())
        }

        async fn write(&mut self, handle: &ServiceHandle, payload: &[u8]) -> Result<(), LinkError> {
            self.record(RadioOp::Write(
                handle.address().to_string(),
                payload.to_vec(),
            ));
            Ok(())
        }

        async fn release(&mut self, handle: ServiceHandle) {
            self.record(RadioOp::Release(handle.address().to_string()));
        }

        async fn disconnect(&mut self, address: &str) {
            self.record(RadioOp::Disconnect(address.to_string()));
        }
    }

    struct Harness {
        manager: HelmetManager,
        radio_tx: RadioEventSender,
        events: mpsc::UnboundedReceiver<HelmetEvent>,
        ops: Arc<Mutex<Vec<RadioOp>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(test_config())
        }

        fn with_config(config: LinkConfig) -> Self {
            Self::build(config, Ok(()))
        }

        fn with_broken_scan(error: LinkError) -> Self {
            Self::build(test_config(), Err(error))
        }

        fn build(config: LinkConfig, scan_result: Result<(), LinkError>) -> Self {
            let ops = Arc::new(Mutex::new(Vec::new()));
            let radio = MockRadio {
                ops: Arc::clone(&ops),
                scan_result,
            };
            let (radio_tx, radio_rx) = mpsc::unbounded_channel();
            let (event_tx, events) = mpsc::unbounded_channel();
            let manager = HelmetManager::new(radio, radio_rx, config, event_tx);
            Self {
                manager,
                radio_tx,
                events,
                ops,
            }
        }

        /// Next event, skipping status-message chatter.
        async fn next_event(&mut self) -> HelmetEvent {
            loop {
                let event = tokio::time::timeout(Duration::from_secs(2), self.events.recv())
                    .await
                    .expect("timed out waiting for an event")
                    .expect("event channel closed");
                if matches!(event, HelmetEvent::LogMessage(_)) {
                    continue;
                }
                return event;
            }
        }

        async fn expect_state(&mut self, state: SessionState) -> Option<LinkError> {
            match self.next_event().await {
                HelmetEvent::StateChanged { state: got, error } => {
                    assert_eq!(got, state);
                    error
                }
                other => panic!("expected {state:?} state change, got {other:?}"),
            }
        }

        /// Consume events until a status message containing `needle` shows
        /// up. Commands and radio events travel on separate channels, so
        /// tests use this to know a command has been processed before
        /// injecting hardware events.
        async fn wait_for_log(&mut self, needle: &str) {
            loop {
                let event = tokio::time::timeout(Duration::from_secs(2), self.events.recv())
                    .await
                    .expect("timed out waiting for a log message")
                    .expect("event channel closed");
                if let HelmetEvent::LogMessage(status) = event {
                    if status.message.contains(needle) {
                        return;
                    }
                }
            }
        }

        /// Wait until the radio has seen `op` (the worker performs radio
        /// calls asynchronously relative to the test).
        async fn wait_for_op(&self, op: &RadioOp) {
            for _ in 0..400 {
                if self.ops().contains(op) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("radio never saw {op:?}");
        }

        fn ops(&self) -> Vec<RadioOp> {
            self.ops.lock().unwrap().clone()
        }

        fn seen(&self, device: &DiscoveredDevice) {
            self.radio_tx
                .send(RadioEvent::DeviceSeen(device.clone()))
                .unwrap();
        }

        async fn drive_to_ready(&mut self, device: &DiscoveredDevice) {
            self.manager.connect(device.clone());
            assert_eq!(self.expect_state(SessionState::Connecting).await, None);
            self.radio_tx
                .send(RadioEvent::LinkUp {
                    address: device.address.clone(),
                })
                .unwrap();
            assert_eq!(
                self.expect_state(SessionState::ServiceDiscovery).await,
                None
            );
            self.radio_tx
                .send(RadioEvent::ServicesResolved {
                    address: device.address.clone(),
                    result: Ok(handle_for(&device.address)),
                })
                .unwrap();
            assert_eq!(self.expect_state(SessionState::Ready).await, None);
        }
    }

    fn test_config() -> LinkConfig {
        LinkConfig {
            service_uuid: protocol::parse_uuid(protocol::HELMET_SERVICE_UUID).unwrap(),
            characteristic_uuid: protocol::parse_uuid(protocol::HELMET_DATA_CHAR_UUID).unwrap(),
            name_prefix: Some(protocol::HELMET_NAME_PREFIX.to_string()),
            connect_timeout: None,
        }
    }

    fn device(name: &str, address: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            name: name.to_string(),
            service_uuids: Vec::new(),
            address: address.to_string(),
            rssi: Some(-60),
        }
    }

    fn handle_for(address: &str) -> ServiceHandle {
        let config = test_config();
        ServiceHandle::new(address, config.service_uuid, config.characteristic_uuid)
    }

    #[tokio::test]
    async fn scan_dedupes_and_filters_by_prefix() {
        let mut h = Harness::new();
        h.manager.start_scan();
        h.wait_for_log("Scanning").await;

        h.seen(&device("HEADWARE-01", "AA"));
        h.seen(&device("OTHER-02", "BB"));
        h.seen(&device("HEADWARE-01", "AA")); // duplicate sighting
        h.seen(&device("HEADWARE-02", "CC"));

        match h.next_event().await {
            HelmetEvent::DeviceDiscovered(d) => assert_eq!(d.address, "AA"),
            other => panic!("unexpected {other:?}"),
        }
        match h.next_event().await {
            HelmetEvent::DeviceDiscovered(d) => assert_eq!(d.address, "CC"),
            other => panic!("unexpected {other:?}"),
        }

        // restarting the scan clears the set, so AA is new again
        h.manager.start_scan();
        h.wait_for_log("Scanning").await;
        h.seen(&device("HEADWARE-01", "AA"));
        match h.next_event().await {
            HelmetEvent::DeviceDiscovered(d) => assert_eq!(d.address, "AA"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn scan_failure_is_reported() {
        let mut h = Harness::with_broken_scan(LinkError::AdapterUnavailable);
        h.manager.start_scan();
        match h.next_event().await {
            HelmetEvent::ScanFailed(error) => assert_eq!(error, LinkError::AdapterUnavailable),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_scan_is_idempotent() {
        let h = Harness::new();
        h.manager.stop_scan(); // no scan yet: no-op
        h.manager.start_scan();
        h.manager.stop_scan();
        h.manager.stop_scan(); // second stop: no-op
        let ops = Arc::clone(&h.ops);
        h.manager.shutdown().await;
        assert_eq!(*ops.lock().unwrap(), vec![RadioOp::StartScan, RadioOp::StopScan]);
    }

    #[tokio::test]
    async fn connect_walks_the_state_machine_and_relays_traffic() {
        let mut h = Harness::new();
        let helmet = device("HEADWARE-01", "AA");
        h.drive_to_ready(&helmet).await;

        h.manager.write(b"reg:worker-7".to_vec());
        h.wait_for_op(&RadioOp::Write("AA".to_string(), b"reg:worker-7".to_vec()))
            .await;
        h.radio_tx
            .send(RadioEvent::WriteAck {
                address: "AA".to_string(),
                result: Ok(()),
            })
            .unwrap();
        match h.next_event().await {
            HelmetEvent::WriteOutcome(Ok(())) => {}
            other => panic!("unexpected {other:?}"),
        }

        h.radio_tx
            .send(RadioEvent::Inbound {
                address: "AA".to_string(),
                payload: b"ui:ok".to_vec(),
            })
            .unwrap();
        match h.next_event().await {
            HelmetEvent::Inbound(message) => assert_eq!(message.payload, b"ui:ok"),
            other => panic!("unexpected {other:?}"),
        }

        assert!(h
            .ops()
            .contains(&RadioOp::Write("AA".to_string(), b"reg:worker-7".to_vec())));
    }

    #[tokio::test]
    async fn missing_service_disconnects_with_service_not_found() {
        let mut h = Harness::new();
        h.manager.connect(device("HEADWARE-01", "AA"));
        assert_eq!(h.expect_state(SessionState::Connecting).await, None);
        h.radio_tx
            .send(RadioEvent::LinkUp {
                address: "AA".to_string(),
            })
            .unwrap();
        assert_eq!(h.expect_state(SessionState::ServiceDiscovery).await, None);
        h.radio_tx
            .send(RadioEvent::ServicesResolved {
                address: "AA".to_string(),
                result: Err(LinkError::ServiceNotFound),
            })
            .unwrap();
        assert_eq!(
            h.expect_state(SessionState::Disconnected).await,
            Some(LinkError::ServiceNotFound)
        );
        // no handle existed, so the link itself is cancelled
        assert!(h.ops().contains(&RadioOp::Disconnect("AA".to_string())));
    }

    #[tokio::test]
    async fn connect_failure_disconnects() {
        let mut h = Harness::new();
        h.manager.connect(device("HEADWARE-01", "AA"));
        assert_eq!(h.expect_state(SessionState::Connecting).await, None);
        h.radio_tx
            .send(RadioEvent::ConnectFailed {
                address: "AA".to_string(),
                error: LinkError::ConnectFailed("refused".to_string()),
            })
            .unwrap();
        assert_eq!(
            h.expect_state(SessionState::Disconnected).await,
            Some(LinkError::ConnectFailed("refused".to_string()))
        );
    }

    #[tokio::test]
    async fn write_outside_ready_fails_without_transport_io() {
        let mut h = Harness::new();

        // no session at all
        h.manager.write(b"x".to_vec());
        match h.next_event().await {
            HelmetEvent::WriteOutcome(Err(LinkError::NotReady)) => {}
            other => panic!("unexpected {other:?}"),
        }

        // session exists but is still connecting
        h.manager.connect(device("HEADWARE-01", "AA"));
        assert_eq!(h.expect_state(SessionState::Connecting).await, None);
        h.manager.write(b"y".to_vec());
        match h.next_event().await {
            HelmetEvent::WriteOutcome(Err(LinkError::NotReady)) => {}
            other => panic!("unexpected {other:?}"),
        }

        assert!(!h
            .ops()
            .iter()
            .any(|op| matches!(op, RadioOp::Write(_, _))));
    }

    #[tokio::test]
    async fn second_connect_supersedes_the_first() {
        let mut h = Harness::new();
        h.manager.connect(device("HEADWARE-01", "AA"));
        assert_eq!(h.expect_state(SessionState::Connecting).await, None);

        // B arrives before A resolved anything
        h.manager.connect(device("HEADWARE-02", "BB"));
        assert_eq!(h.expect_state(SessionState::Disconnected).await, None); // A torn down
        assert_eq!(h.expect_state(SessionState::Connecting).await, None); // B under way

        // stale completions for A must be ignored, and A's late handle
        // must be released rather than kept
        h.radio_tx
            .send(RadioEvent::LinkUp {
                address: "AA".to_string(),
            })
            .unwrap();
        h.radio_tx
            .send(RadioEvent::ServicesResolved {
                address: "AA".to_string(),
                result: Ok(handle_for("AA")),
            })
            .unwrap();

        h.radio_tx
            .send(RadioEvent::LinkUp {
                address: "BB".to_string(),
            })
            .unwrap();
        assert_eq!(
            h.expect_state(SessionState::ServiceDiscovery).await,
            None
        );
        h.radio_tx
            .send(RadioEvent::ServicesResolved {
                address: "BB".to_string(),
                result: Ok(handle_for("BB")),
            })
            .unwrap();
        assert_eq!(h.expect_state(SessionState::Ready).await, None);

        let ops = h.ops();
        assert!(ops.contains(&RadioOp::Disconnect("AA".to_string())));
        assert!(ops.contains(&RadioOp::Release("AA".to_string())));
        // exactly one session reached Ready, and it resolved on BB
        assert!(!ops.contains(&RadioOp::Resolve("AA".to_string())));
        assert!(ops.contains(&RadioOp::Resolve("BB".to_string())));
    }

    #[tokio::test]
    async fn negative_write_ack_keeps_the_session_ready() {
        let mut h = Harness::new();
        let helmet = device("HEADWARE-01", "AA");
        h.drive_to_ready(&helmet).await;

        h.manager.write(b"ping".to_vec());
        h.wait_for_op(&RadioOp::Write("AA".to_string(), b"ping".to_vec()))
            .await;
        h.radio_tx
            .send(RadioEvent::WriteAck {
                address: "AA".to_string(),
                result: Err(LinkError::TransportError("nak".to_string())),
            })
            .unwrap();
        match h.next_event().await {
            HelmetEvent::WriteOutcome(Err(LinkError::TransportError(reason))) => {
                assert_eq!(reason, "nak");
            }
            other => panic!("unexpected {other:?}"),
        }

        // still Ready: notifications keep flowing
        h.radio_tx
            .send(RadioEvent::Inbound {
                address: "AA".to_string(),
                payload: vec![0x01],
            })
            .unwrap();
        match h.next_event().await {
            HelmetEvent::Inbound(message) => assert_eq!(message.payload, vec![0x01]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn nothing_is_delivered_after_disconnect() {
        let mut h = Harness::new();
        let helmet = device("HEADWARE-01", "AA");
        h.drive_to_ready(&helmet).await;

        h.manager.disconnect();
        assert_eq!(h.expect_state(SessionState::Disconnected).await, None);
        assert!(h.ops().contains(&RadioOp::Release("AA".to_string())));

        // late traffic for the dead session is dropped
        h.radio_tx
            .send(RadioEvent::Inbound {
                address: "AA".to_string(),
                payload: b"late".to_vec(),
            })
            .unwrap();
        h.radio_tx
            .send(RadioEvent::WriteAck {
                address: "AA".to_string(),
                result: Ok(()),
            })
            .unwrap();

        // marker: the next observable event is the fresh scan result, not
        // the stale traffic
        h.manager.start_scan();
        h.wait_for_log("Scanning").await;
        h.seen(&device("HEADWARE-09", "ZZ"));
        match h.next_event().await {
            HelmetEvent::DeviceDiscovered(d) => assert_eq!(d.address, "ZZ"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn link_loss_tears_the_session_down() {
        let mut h = Harness::new();
        let helmet = device("HEADWARE-01", "AA");
        h.drive_to_ready(&helmet).await;

        h.radio_tx
            .send(RadioEvent::LinkDown {
                address: "AA".to_string(),
            })
            .unwrap();
        assert_eq!(h.expect_state(SessionState::Disconnected).await, None);
        assert!(h.ops().contains(&RadioOp::Release("AA".to_string())));
    }

    #[tokio::test]
    async fn shutdown_releases_a_live_session() {
        let mut h = Harness::new();
        let helmet = device("HEADWARE-01", "AA");
        h.drive_to_ready(&helmet).await;

        let ops = Arc::clone(&h.ops);
        h.manager.shutdown().await;
        assert!(ops.lock().unwrap().contains(&RadioOp::Release("AA".to_string())));
    }

    #[tokio::test]
    async fn connect_deadline_forces_timeout() {
        let mut config = test_config();
        config.connect_timeout = Some(Duration::from_millis(50));
        let mut h = Harness::with_config(config);

        h.manager.connect(device("HEADWARE-01", "AA"));
        assert_eq!(h.expect_state(SessionState::Connecting).await, None);
        // the radio never answers
        assert_eq!(
            h.expect_state(SessionState::Disconnected).await,
            Some(LinkError::Timeout)
        );
        assert!(h.ops().contains(&RadioOp::Disconnect("AA".to_string())));
    }
}
