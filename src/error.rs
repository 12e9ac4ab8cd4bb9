//! Error types for the ble-device-sync crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The session has not been started, or has already been stopped.
    #[error("BLE session not started")]
    SessionNotStarted,

    /// The referenced peripheral is unknown to the session.
    #[error("Peripheral not found: {identifier}")]
    PeripheralNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// Operation requires a connection but the peripheral is not connected.
    #[error("Peripheral not connected")]
    NotConnected,

    /// Invalid data was received from the peripheral.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// The requested operation is not supported.
    #[error("Operation not supported: {operation}")]
    NotSupported {
        /// Description of the unsupported operation.
        operation: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// A read-write property declares no write payloads at all.
    #[error("Property {property} has an empty write table")]
    EmptyWriteTable {
        /// Name of the offending property.
        property: String,
    },

    /// A read-write property has no write payload for its default value.
    #[error("Property {property} has no write entry for default value {label:?}")]
    MissingWriteEntry {
        /// Name of the offending property.
        property: String,
        /// The default value label that was looked up.
        label: String,
    },

    /// A characteristic identifier could not be parsed as a UUID.
    #[error("Invalid UUID: {value}")]
    InvalidUuid {
        /// The text that failed to parse.
        value: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Declarative input could not be decoded.
    #[cfg(feature = "serde")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
