//! Session controller for one resync cycle.
//!
//! The controller is an explicit state machine driven by [`SessionEvent`]s:
//!
//! ```text
//! Idle --PoweredOn--> Scanning --match--> Connecting --connected--> Connected
//!                                                                      |
//!                                   Disconnected <--disconnected-------+
//! ```
//!
//! On entering `Connected` it walks every service and characteristic,
//! dispatches matched properties to the [`CharacteristicProcessor`], holds
//! the link open for the observation window and then releases it. The
//! controller fires its [`DoneSignal`] when the peripheral disconnects.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

use crate::ble::connection::ConnectionState;
use crate::ble::session::{
    AdapterState, Advertisement, BleSession, DiscoveredPeripheral, SessionEvent, SessionEvents,
};
use crate::config::SyncConfig;
use crate::data::{AccessMode, DataConverter, DeviceSpec, StatusStore};
use crate::processor::CharacteristicProcessor;

/// Resolves once a controller's peripheral has disconnected.
#[derive(Debug)]
pub struct DoneSignal(oneshot::Receiver<()>);

impl DoneSignal {
    /// Wait for the cycle to finish.
    ///
    /// Returns `false` if the controller was dropped without the peripheral
    /// disconnecting.
    pub async fn wait(self) -> bool {
        self.0.await.is_ok()
    }
}

/// Drives one connection attempt from scan to disconnect.
pub struct SessionController {
    spec: Arc<DeviceSpec>,
    session: Arc<dyn BleSession>,
    converter: Arc<dyn DataConverter>,
    status: StatusStore,
    state: ConnectionState,
    /// Peripheral selected by the first discovery match.
    target: Option<DiscoveredPeripheral>,
    /// Taken on the transition to `Disconnected`, so it fires at most once.
    done: Option<oneshot::Sender<()>>,
    mtu: u16,
    observation_window: Duration,
}

impl SessionController {
    /// Create a controller and the signal it fires when done.
    pub fn new(
        spec: Arc<DeviceSpec>,
        session: Arc<dyn BleSession>,
        converter: Arc<dyn DataConverter>,
        status: StatusStore,
        config: &SyncConfig,
    ) -> (Self, DoneSignal) {
        let (done_tx, done_rx) = oneshot::channel();

        let controller = Self {
            spec,
            session,
            converter,
            status,
            state: ConnectionState::Idle,
            target: None,
            done: Some(done_tx),
            mtu: config.mtu,
            observation_window: config.observation_window,
        };

        (controller, DoneSignal(done_rx))
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The status store this controller writes into.
    pub fn status(&self) -> &StatusStore {
        &self.status
    }

    /// The selected peripheral, once one has matched.
    pub fn target(&self) -> Option<&DiscoveredPeripheral> {
        self.target.as_ref()
    }

    /// Consume events until the peripheral disconnects or the stream ends.
    pub async fn run(mut self, mut events: SessionEvents) -> ConnectionState {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
            if self.state.is_done() {
                break;
            }
        }

        debug!("Session controller finished in state {}", self.state);
        self.state
    }

    /// Apply one event.
    pub async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::AdapterStateChanged(state) => self.on_adapter_state_changed(state).await,
            SessionEvent::PeripheralDiscovered {
                peripheral,
                advertisement,
                rssi,
            } => {
                self.on_peripheral_discovered(peripheral, advertisement, rssi)
                    .await
            }
            SessionEvent::PeripheralConnected { peripheral, error } => {
                self.on_peripheral_connected(peripheral, error).await
            }
            SessionEvent::PeripheralDisconnected { peripheral, error } => {
                self.on_peripheral_disconnected(peripheral, error)
            }
        }
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        if self.state != new_state {
            debug!("Session state changed: {} -> {}", self.state, new_state);
            self.state = new_state;
        }
    }

    async fn on_adapter_state_changed(&mut self, adapter_state: AdapterState) {
        info!("Bluetooth adapter state: {}", adapter_state);

        if !adapter_state.is_powered_on() {
            if let Err(e) = self.session.stop_scanning().await {
                debug!("Failed to stop scanning: {}", e);
            }
            return;
        }

        match self.state {
            ConnectionState::Idle | ConnectionState::Scanning => self.start_scanning().await,
            other => debug!("Adapter powered on while {}, nothing to do", other),
        }
    }

    async fn start_scanning(&mut self) {
        info!("Scanning...");
        match self.session.scan(Vec::new()).await {
            Ok(()) => self.set_state(ConnectionState::Scanning),
            Err(e) => error!("Failed to start scanning: {}", e),
        }
    }

    async fn on_peripheral_discovered(
        &mut self,
        peripheral: DiscoveredPeripheral,
        advertisement: Advertisement,
        rssi: Option<i16>,
    ) {
        if self.state != ConnectionState::Scanning {
            trace!("Ignoring discovery of {} while {}", peripheral, self.state);
            return;
        }

        if !self
            .spec
            .protocol
            .matches(advertisement.local_name.as_deref(), &peripheral.address)
        {
            trace!("Skipping {} ({:?} dBm)", peripheral, rssi);
            return;
        }

        info!("Found {} ({:?} dBm), stopping scan", peripheral, rssi);
        if let Err(e) = self.session.stop_scanning().await {
            warn!("Failed to stop scanning: {}", e);
        }

        self.set_state(ConnectionState::Connecting);
        self.target = Some(peripheral.clone());

        if let Err(e) = self.session.connect(&peripheral).await {
            warn!("Failed to connect to {}: {}", peripheral, e);
            self.target = None;
            self.start_scanning().await;
        }
    }

    async fn on_peripheral_connected(
        &mut self,
        peripheral: DiscoveredPeripheral,
        error: Option<String>,
    ) {
        if !self.state.awaits_connection() || !self.is_target(&peripheral) {
            debug!("Ignoring connection of {} while {}", peripheral, self.state);
            return;
        }

        if let Some(e) = error {
            warn!("Connection to {} failed: {}", peripheral, e);
            self.target = None;
            self.start_scanning().await;
            return;
        }

        info!("Connected to {}", peripheral);
        self.target = Some(peripheral.clone());
        self.set_state(ConnectionState::Connected);

        self.process_connection(&peripheral).await;

        // Released on every path out of processing, including early aborts.
        if let Err(e) = self.session.cancel_connection(&peripheral).await {
            warn!("Failed to release connection to {}: {}", peripheral, e);
        }
    }

    fn on_peripheral_disconnected(&mut self, peripheral: DiscoveredPeripheral, error: Option<String>) {
        let linked = matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        );
        if !linked || !self.is_target(&peripheral) {
            debug!("Ignoring disconnect of {} while {}", peripheral, self.state);
            return;
        }

        match error {
            Some(e) => info!("Device {} disconnected: {}", peripheral, e),
            None => info!("Device {} disconnected", peripheral),
        }

        self.set_state(ConnectionState::Disconnected);
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }

    fn is_target(&self, peripheral: &DiscoveredPeripheral) -> bool {
        self.target
            .as_ref()
            .map(|t| t.id == peripheral.id)
            .unwrap_or(false)
    }

    /// Walk the GATT tree and run each matched property's protocol.
    async fn process_connection(&self, peripheral: &DiscoveredPeripheral) {
        if let Err(e) = self.session.set_mtu(peripheral, self.mtu).await {
            warn!("Failed to set MTU to {}: {}", self.mtu, e);
        }

        let services = match self.session.discover_services(peripheral).await {
            Ok(services) => services,
            Err(e) => {
                error!("Failed to discover services on {}: {}", peripheral, e);
                return;
            }
        };

        let processor = CharacteristicProcessor::new(
            self.session.as_ref(),
            peripheral,
            self.converter.as_ref(),
            &self.status,
        );

        for service in &services {
            let characteristics = match self
                .session
                .discover_characteristics(peripheral, service)
                .await
            {
                Ok(characteristics) => characteristics,
                Err(e) => {
                    error!(
                        "Failed to discover characteristics of service {}: {}",
                        service.uuid, e
                    );
                    continue;
                }
            };

            for characteristic in &characteristics {
                let Some(property) = self.spec.find_property(&characteristic.uuid) else {
                    trace!("No property for characteristic {}", characteristic.uuid);
                    continue;
                };

                match &property.access_mode {
                    AccessMode::ReadOnly => {
                        if let Err(e) = processor.read(characteristic, property).await {
                            error!("Failed to read characteristic for {}: {}", property.name, e);
                        }
                    }
                    AccessMode::ReadWrite => {
                        if let Err(e) = processor.write(characteristic, property).await {
                            error!("Failed to write characteristic for {}: {}", property.name, e);
                            return;
                        }
                    }
                    AccessMode::NotifyOnly => {
                        if let Err(e) = processor.subscribe(characteristic, property).await {
                            error!(
                                "Failed to subscribe to characteristic for {}: {}",
                                property.name, e
                            );
                            return;
                        }
                    }
                    AccessMode::Unrecognized(mode) => {
                        warn!(
                            "Access mode {:?} of {} is not a valid option, skipping",
                            mode, property.name
                        );
                    }
                }
            }
        }

        info!(
            "Waiting {:?} for notifications, if any",
            self.observation_window
        );
        tokio::time::sleep(self.observation_window).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::session::{GattCharacteristic, GattService, MockBleSession};
    use crate::data::{LayoutConverter, PropertyDefinition, ProtocolIdentity};
    use crate::error::Error;
    use btleplug::api::CharPropFlags;
    use mockall::Sequence;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    const SERVICE: Uuid = Uuid::from_u128(0xfff0);
    const FIRST: Uuid = Uuid::from_u128(0xfff1);
    const SECOND: Uuid = Uuid::from_u128(0xfff2);
    const UNKNOWN: Uuid = Uuid::from_u128(0xfff9);

    fn config() -> SyncConfig {
        SyncConfig {
            observation_window: Duration::ZERO,
            ..SyncConfig::default()
        }
    }

    fn target() -> DiscoveredPeripheral {
        DiscoveredPeripheral::new("dev-1", "aa:bb:cc:dd:ee:ff")
    }

    fn controller(spec: DeviceSpec, session: MockBleSession) -> (SessionController, DoneSignal) {
        SessionController::new(
            Arc::new(spec),
            Arc::new(session),
            Arc::new(LayoutConverter),
            StatusStore::default(),
            &config(),
        )
    }

    fn gatt_tree(session: &mut MockBleSession, characteristics: Vec<GattCharacteristic>) {
        session
            .expect_set_mtu()
            .returning(|_, _| Err(Error::NotSupported {
                operation: "mtu".to_string(),
            }));
        session.expect_discover_services().returning(|_| {
            Ok(vec![GattService {
                uuid: SERVICE,
                primary: true,
            }])
        });
        session
            .expect_discover_characteristics()
            .returning(move |_, _| Ok(characteristics.clone()));
        session.expect_cancel_connection().times(1).returning(|_| Ok(()));
    }

    fn read_char(uuid: Uuid) -> GattCharacteristic {
        GattCharacteristic::new(uuid, SERVICE, CharPropFlags::READ | CharPropFlags::WRITE)
    }

    fn discovered(peripheral: DiscoveredPeripheral, name: &str) -> SessionEvent {
        SessionEvent::PeripheralDiscovered {
            peripheral,
            advertisement: Advertisement::named(name),
            rssi: Some(-60),
        }
    }

    fn connecting(controller: &mut SessionController) {
        controller.state = ConnectionState::Connecting;
        controller.target = Some(target());
    }

    async fn connect(controller: &mut SessionController) {
        controller
            .handle_event(SessionEvent::PeripheralConnected {
                peripheral: target(),
                error: None,
            })
            .await;
    }

    #[tokio::test]
    async fn test_powered_on_starts_scanning() {
        let mut session = MockBleSession::new();
        session
            .expect_scan()
            .withf(|services| services.is_empty())
            .times(1)
            .returning(|_| Ok(()));

        let (mut controller, _done) = controller(DeviceSpec::default(), session);
        controller
            .handle_event(SessionEvent::AdapterStateChanged(AdapterState::PoweredOn))
            .await;

        assert_eq!(controller.state(), ConnectionState::Scanning);
    }

    #[tokio::test]
    async fn test_powered_off_pauses_scanning() {
        let mut session = MockBleSession::new();
        session.expect_scan().times(0);
        session.expect_stop_scanning().times(1).returning(|| Ok(()));

        let (mut controller, _done) = controller(DeviceSpec::default(), session);
        controller
            .handle_event(SessionEvent::AdapterStateChanged(AdapterState::PoweredOff))
            .await;

        assert_eq!(controller.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_address_filter_ignores_case_and_first_match_wins() {
        let spec = DeviceSpec::new(ProtocolIdentity {
            name: String::new(),
            mac_address: "AA:BB:CC:DD:EE:FF".to_string(),
        });

        let mut seq = Sequence::new();
        let mut session = MockBleSession::new();
        session
            .expect_scan()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        session
            .expect_stop_scanning()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        session
            .expect_connect()
            .withf(|p| p.id == "dev-1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let (mut controller, _done) = controller(spec, session);
        controller
            .handle_event(SessionEvent::AdapterStateChanged(AdapterState::PoweredOn))
            .await;

        let other = DiscoveredPeripheral::new("dev-0", "11:22:33:44:55:66");
        controller.handle_event(discovered(other, "Other")).await;
        assert_eq!(controller.state(), ConnectionState::Scanning);

        controller.handle_event(discovered(target(), "Anything")).await;
        assert_eq!(controller.state(), ConnectionState::Connecting);

        // A second match is not connected to.
        let twin = DiscoveredPeripheral::new("dev-2", "AA:BB:CC:DD:EE:FF");
        controller.handle_event(discovered(twin, "Twin")).await;
        assert_eq!(controller.target().unwrap().id, "dev-1");
    }

    #[tokio::test]
    async fn test_name_filter_is_case_sensitive() {
        let spec = DeviceSpec::new(ProtocolIdentity {
            name: "Thermo".to_string(),
            mac_address: String::new(),
        });

        let mut session = MockBleSession::new();
        session.expect_scan().returning(|_| Ok(()));
        session.expect_connect().times(0);

        let (mut controller, _done) = controller(spec, session);
        controller
            .handle_event(SessionEvent::AdapterStateChanged(AdapterState::PoweredOn))
            .await;
        controller.handle_event(discovered(target(), "thermo")).await;

        assert_eq!(controller.state(), ConnectionState::Scanning);
        assert!(controller.target().is_none());
    }

    #[tokio::test]
    async fn test_failed_connection_resumes_scanning() {
        let mut session = MockBleSession::new();
        session.expect_scan().times(2).returning(|_| Ok(()));
        session.expect_stop_scanning().returning(|| Ok(()));
        session.expect_connect().returning(|_| Ok(()));

        let (mut controller, _done) = controller(DeviceSpec::default(), session);
        controller
            .handle_event(SessionEvent::AdapterStateChanged(AdapterState::PoweredOn))
            .await;
        controller.handle_event(discovered(target(), "Thermo")).await;
        controller
            .handle_event(SessionEvent::PeripheralConnected {
                peripheral: target(),
                error: Some("le-connection-abort-by-local".to_string()),
            })
            .await;

        assert_eq!(controller.state(), ConnectionState::Scanning);
        assert!(controller.target().is_none());
    }

    #[tokio::test]
    async fn test_unrecognized_mode_skipped_without_affecting_siblings() {
        let spec = DeviceSpec::default()
            .with_property(PropertyDefinition::new("odd", AccessMode::from("WriteOnly"), FIRST))
            .with_property(PropertyDefinition::new("level", AccessMode::ReadOnly, SECOND));

        let mut session = MockBleSession::new();
        gatt_tree(
            &mut session,
            vec![read_char(FIRST), read_char(UNKNOWN), read_char(SECOND)],
        );
        session
            .expect_read_characteristic()
            .withf(|_, c| c.uuid == SECOND)
            .times(1)
            .returning(|_, _| Ok(vec![55]));
        session.expect_write_characteristic().times(0);

        let (mut controller, _done) = controller(spec, session);
        connecting(&mut controller);
        connect(&mut controller).await;

        let status = controller.status().snapshot();
        assert_eq!(status.names(), vec!["level"]);
        assert_eq!(status.get("level").unwrap().reported, "55.000000");
    }

    #[tokio::test]
    async fn test_read_failure_continues_with_next_characteristic() {
        let spec = DeviceSpec::default()
            .with_property(PropertyDefinition::new("a", AccessMode::ReadOnly, FIRST))
            .with_property(PropertyDefinition::new("b", AccessMode::ReadOnly, SECOND));

        let mut session = MockBleSession::new();
        gatt_tree(&mut session, vec![read_char(FIRST), read_char(SECOND)]);
        session
            .expect_read_characteristic()
            .withf(|_, c| c.uuid == FIRST)
            .returning(|_, _| Err(Error::NotConnected));
        session
            .expect_read_characteristic()
            .withf(|_, c| c.uuid == SECOND)
            .returning(|_, _| Ok(vec![2]));

        let (mut controller, _done) = controller(spec, session);
        connecting(&mut controller);
        connect(&mut controller).await;

        assert_eq!(controller.status().snapshot().names(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_write_failure_aborts_remaining_but_releases() {
        let spec = DeviceSpec::default()
            .with_property(
                PropertyDefinition::new("switch", AccessMode::ReadWrite, FIRST)
                    .with_default_value("on"),
            )
            .with_property(PropertyDefinition::new("level", AccessMode::ReadOnly, SECOND));

        let mut session = MockBleSession::new();
        gatt_tree(&mut session, vec![read_char(FIRST), read_char(SECOND)]);
        session.expect_write_characteristic().times(0);
        session.expect_read_characteristic().times(0);

        let (mut controller, _done) = controller(spec, session);
        connecting(&mut controller);
        connect(&mut controller).await;

        assert_eq!(controller.state(), ConnectionState::Connected);
        assert!(controller.status().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_failure_aborts_remaining() {
        let spec = DeviceSpec::default()
            .with_property(PropertyDefinition::new("button", AccessMode::NotifyOnly, FIRST))
            .with_property(PropertyDefinition::new("level", AccessMode::ReadOnly, SECOND));

        let mut session = MockBleSession::new();
        gatt_tree(
            &mut session,
            vec![
                GattCharacteristic::new(FIRST, SERVICE, CharPropFlags::NOTIFY),
                read_char(SECOND),
            ],
        );
        session
            .expect_discover_descriptors()
            .returning(|_, _| Ok(vec![]));
        session
            .expect_set_notify_value()
            .returning(|_, _, _| Err(Error::NotConnected));
        session.expect_read_characteristic().times(0);

        let (mut controller, _done) = controller(spec, session);
        connecting(&mut controller);
        connect(&mut controller).await;

        assert!(controller.status().is_empty());
    }

    #[tokio::test]
    async fn test_service_discovery_failure_still_releases() {
        let mut session = MockBleSession::new();
        session.expect_set_mtu().returning(|_, _| Ok(()));
        session
            .expect_discover_services()
            .returning(|_| Err(Error::NotConnected));
        session.expect_discover_characteristics().times(0);
        session.expect_cancel_connection().times(1).returning(|_| Ok(()));

        let (mut controller, _done) = controller(DeviceSpec::default(), session);
        connecting(&mut controller);
        connect(&mut controller).await;
    }

    #[tokio::test]
    async fn test_disconnect_fires_done_once() {
        let session = MockBleSession::new();
        let (mut controller, done) = controller(DeviceSpec::default(), session);
        controller.target = Some(target());
        controller.state = ConnectionState::Connected;

        let stranger = DiscoveredPeripheral::new("dev-9", "99:99:99:99:99:99");
        controller
            .handle_event(SessionEvent::PeripheralDisconnected {
                peripheral: stranger,
                error: None,
            })
            .await;
        assert_eq!(controller.state(), ConnectionState::Connected);

        for _ in 0..2 {
            controller
                .handle_event(SessionEvent::PeripheralDisconnected {
                    peripheral: target(),
                    error: None,
                })
                .await;
        }

        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(controller.done.is_none());
        assert!(done.wait().await);
    }

    #[tokio::test]
    async fn test_unrelated_disconnect_while_scanning_is_ignored() {
        let spec = DeviceSpec::new(ProtocolIdentity {
            name: String::new(),
            mac_address: "AA:BB:CC:DD:EE:FF".to_string(),
        });

        let mut session = MockBleSession::new();
        session.expect_scan().times(1).returning(|_| Ok(()));

        let (mut controller, mut done) = controller(spec, session);
        controller
            .handle_event(SessionEvent::AdapterStateChanged(AdapterState::PoweredOn))
            .await;

        let headset = DiscoveredPeripheral::new("headset", "11:22:33:44:55:66");
        controller
            .handle_event(SessionEvent::PeripheralDisconnected {
                peripheral: headset,
                error: Some("remote user terminated connection".to_string()),
            })
            .await;

        // Even the target's own id is ignored before it has been selected.
        controller
            .handle_event(SessionEvent::PeripheralDisconnected {
                peripheral: target(),
                error: None,
            })
            .await;

        assert_eq!(controller.state(), ConnectionState::Scanning);
        assert!(controller.done.is_some());
        assert!(done.0.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_controller_reports_not_done() {
        let (controller, done) = controller(DeviceSpec::default(), MockBleSession::new());
        drop(controller);
        assert!(!done.wait().await);
    }
}
