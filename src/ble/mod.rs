//! BLE communication module.
//!
//! This module provides the session abstraction the resync loop drives, its
//! `btleplug` implementation, and the standard UUIDs it needs.

pub mod adapter;
pub mod connection;
pub mod session;
pub mod uuids;

pub use adapter::AdapterSession;
pub use connection::ConnectionState;
pub use session::{
    AdapterState, Advertisement, BleSession, DiscoveredPeripheral, GattCharacteristic,
    GattService, NotificationHandler, SessionEvent, SessionEvents,
};
pub use uuids::*;
