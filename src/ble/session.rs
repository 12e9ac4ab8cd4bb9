//! The BLE central capability driven by the session controller.
//!
//! [`BleSession`] exposes the GATT operations the controller needs. Lifecycle
//! notifications (adapter state, discovery, connect, disconnect) are
//! delivered as [`SessionEvent`]s on the channel returned by
//! [`BleSession::start`].

use async_trait::async_trait;
use btleplug::api::CharPropFlags;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;

/// Power state of the local adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AdapterState {
    /// State could not be determined.
    #[default]
    Unknown,
    /// Adapter is on and can scan.
    PoweredOn,
    /// Adapter is off.
    PoweredOff,
}

impl AdapterState {
    /// Check if the adapter can scan.
    pub fn is_powered_on(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

impl From<btleplug::api::CentralState> for AdapterState {
    fn from(state: btleplug::api::CentralState) -> Self {
        use btleplug::api::CentralState;

        match state {
            CentralState::PoweredOn => Self::PoweredOn,
            CentralState::PoweredOff => Self::PoweredOff,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::PoweredOn => write!(f, "PoweredOn"),
            Self::PoweredOff => write!(f, "PoweredOff"),
        }
    }
}

/// A peripheral seen during scanning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveredPeripheral {
    /// Session-unique identifier.
    pub id: String,
    /// Hardware address as reported by the platform.
    pub address: String,
    /// Name known for the peripheral, if any.
    pub local_name: Option<String>,
}

impl DiscoveredPeripheral {
    /// Create a new peripheral description.
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            local_name: None,
        }
    }

    /// Set the local name.
    pub fn with_local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = Some(name.into());
        self
    }
}

impl std::fmt::Display for DiscoveredPeripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.local_name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Advertisement payload accompanying a discovery.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Advertisement {
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Manufacturer data by company ID.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
    /// Advertised transmit power.
    pub tx_power_level: Option<i16>,
}

impl Advertisement {
    /// Advertisement carrying only a local name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            local_name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// A discovered GATT service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GattService {
    /// Service UUID.
    pub uuid: Uuid,
    /// Whether this is a primary service.
    pub primary: bool,
}

/// A discovered GATT characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the owning service.
    pub service_uuid: Uuid,
    /// Declared properties.
    pub properties: CharPropFlags,
}

impl GattCharacteristic {
    /// Create a characteristic description.
    pub fn new(uuid: Uuid, service_uuid: Uuid, properties: CharPropFlags) -> Self {
        Self {
            uuid,
            service_uuid,
            properties,
        }
    }

    /// Check if the characteristic can push values via notify or indicate.
    pub fn can_notify(&self) -> bool {
        self.properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
    }
}

/// Lifecycle events delivered by a started session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The adapter changed power state.
    AdapterStateChanged(AdapterState),
    /// A peripheral was seen while scanning.
    PeripheralDiscovered {
        /// The peripheral.
        peripheral: DiscoveredPeripheral,
        /// Its advertisement.
        advertisement: Advertisement,
        /// Signal strength in dBm.
        rssi: Option<i16>,
    },
    /// A connection request completed.
    PeripheralConnected {
        /// The peripheral.
        peripheral: DiscoveredPeripheral,
        /// Set if the connection failed.
        error: Option<String>,
    },
    /// A peripheral disconnected.
    PeripheralDisconnected {
        /// The peripheral.
        peripheral: DiscoveredPeripheral,
        /// Set if the link was lost abnormally.
        error: Option<String>,
    },
}

/// Receiving end of a session's lifecycle events.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Callback invoked with each notified or indicated value.
pub type NotificationHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// BLE central operations.
///
/// Implementations deliver lifecycle changes asynchronously through the
/// channel returned by [`start`](Self::start); GATT operations on a connected
/// peripheral are plain async calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BleSession: Send + Sync {
    /// Start event dispatch for a new cycle.
    ///
    /// The current adapter state is delivered as the first event.
    async fn start(&self) -> Result<SessionEvents>;

    /// Stop event dispatch and tear down what is left of the cycle.
    ///
    /// Implementations must stop any scan, disconnect every peripheral still
    /// connected through this session and drop all notification handlers.
    /// A cycle that times out is abandoned mid-processing without
    /// [`cancel_connection`](Self::cancel_connection), so this is the only
    /// release such a connection gets.
    async fn stop(&self) -> Result<()>;

    /// Start scanning. An empty service list means no filtering.
    async fn scan(&self, services: Vec<Uuid>) -> Result<()>;

    /// Stop scanning.
    async fn stop_scanning(&self) -> Result<()>;

    /// Request a connection. Completion is reported as
    /// [`SessionEvent::PeripheralConnected`].
    async fn connect(&self, peripheral: &DiscoveredPeripheral) -> Result<()>;

    /// Release a connection. Completion is reported as
    /// [`SessionEvent::PeripheralDisconnected`].
    async fn cancel_connection(&self, peripheral: &DiscoveredPeripheral) -> Result<()>;

    /// Negotiate the maximum transfer unit.
    async fn set_mtu(&self, peripheral: &DiscoveredPeripheral, mtu: u16) -> Result<()>;

    /// Discover all services.
    async fn discover_services(&self, peripheral: &DiscoveredPeripheral) -> Result<Vec<GattService>>;

    /// Discover all characteristics of a service.
    async fn discover_characteristics(
        &self,
        peripheral: &DiscoveredPeripheral,
        service: &GattService,
    ) -> Result<Vec<GattCharacteristic>>;

    /// Discover the descriptors of a characteristic, returning their UUIDs.
    async fn discover_descriptors(
        &self,
        peripheral: &DiscoveredPeripheral,
        characteristic: &GattCharacteristic,
    ) -> Result<Vec<Uuid>>;

    /// Read a characteristic value.
    async fn read_characteristic(
        &self,
        peripheral: &DiscoveredPeripheral,
        characteristic: &GattCharacteristic,
    ) -> Result<Vec<u8>>;

    /// Write a characteristic value.
    async fn write_characteristic(
        &self,
        peripheral: &DiscoveredPeripheral,
        characteristic: &GattCharacteristic,
        data: &[u8],
        with_response: bool,
    ) -> Result<()>;

    /// Subscribe to a characteristic and route each delivered value to `handler`.
    async fn set_notify_value(
        &self,
        peripheral: &DiscoveredPeripheral,
        characteristic: &GattCharacteristic,
        handler: NotificationHandler,
    ) -> Result<()>;
}
