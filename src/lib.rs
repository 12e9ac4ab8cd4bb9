// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ble-device-sync
//!
//! Keeps the reported status of Bluetooth Low Energy peripherals in sync with
//! a declarative device spec.
//!
//! A [`Device`] runs a periodic resync loop. Each cycle it scans for the
//! peripheral named by the [`DeviceSpec`] protocol identity, connects, and walks the
//! GATT tree. Every characteristic that backs a spec property is read,
//! written (then read back) or subscribed to according to the property's
//! access mode, and the results are merged into a [`StatusSnapshot`] that is
//! handed to a [`StatusPublisher`] once per cycle.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ble_device_sync::{
//!     AdapterSession, Device, DeviceIdentity, DeviceSpec, LayoutConverter, StatusFeed,
//!     StatusSnapshot, SyncConfig, Result,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let spec = DeviceSpec::from_json(r#"{
//!         "protocol": { "name": "", "macAddress": "AA:BB:CC:DD:EE:FF" },
//!         "properties": [{
//!             "name": "battery",
//!             "accessMode": "ReadOnly",
//!             "visitor": {
//!                 "characteristicUuid": "2a19",
//!                 "dataConverter": { "startIndex": 0, "endIndex": 0 }
//!             }
//!         }]
//!     }"#)?;
//!
//!     let feed = StatusFeed::default();
//!     let mut updates = feed.subscribe();
//!
//!     let device = Device::new(
//!         DeviceIdentity::new("default", "thermometer"),
//!         Arc::new(AdapterSession::new().await?),
//!         Arc::new(LayoutConverter),
//!         Arc::new(feed),
//!         SyncConfig::default(),
//!     )?;
//!     device.configure(spec, StatusSnapshot::new()).await;
//!
//!     if let Ok(update) = updates.recv().await {
//!         for entry in update.status.iter() {
//!             println!("{} = {}", entry.name, entry.reported);
//!         }
//!     }
//!
//!     device.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ## Feature Flags
//!
//! - `serde` (default): serialization of data types and JSON loading of
//!   device specs and configuration

// Public modules
pub mod ble;
pub mod config;
pub mod controller;
pub mod data;
pub mod device;
pub mod error;
pub mod processor;
pub mod publisher;
pub mod utils;

// Re-exports for convenience
pub use config::{PublishPoint, StatusSeed, SyncConfig};
pub use controller::{DoneSignal, SessionController};
pub use device::Device;
pub use error::{Error, Result};
pub use processor::CharacteristicProcessor;
pub use publisher::{DeviceIdentity, PublishedStatus, StatusFeed, StatusPublisher};
pub use utils::{format_reading, quote_bytes};

// Re-export commonly used types from submodules
pub use ble::adapter::AdapterSession;
pub use ble::connection::ConnectionState;
pub use ble::session::{BleSession, DiscoveredPeripheral, SessionEvent};
pub use data::{
    AccessMode, DataConverter, DataConverterKind, DeviceSpec, LayoutConverter, Operation,
    OperationType, PropertyDefinition, PropertyVisitor, ProtocolIdentity, StatusEntry,
    StatusSnapshot, StatusStore,
};
