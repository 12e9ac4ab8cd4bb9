//! BLE UUID helpers.
//!
//! Property definitions name their characteristic either by a full 128-bit
//! UUID or by the 16/32-bit short form assigned by the Bluetooth SIG. Short
//! forms are expanded against the Bluetooth base UUID.

use uuid::Uuid;

use crate::error::{Error, Result};

/// Bluetooth SIG base UUID (`00000000-0000-1000-8000-00805f9b34fb`).
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb);

/// Client Characteristic Configuration descriptor UUID.
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

/// Battery Level characteristic UUID.
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_00805f9b34fb);

/// Expand a 16-bit SIG-assigned number to a full UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    uuid_from_u32(short as u32)
}

/// Expand a 32-bit SIG-assigned number to a full UUID.
pub const fn uuid_from_u32(short: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID.as_u128() | ((short as u128) << 96))
}

/// Parse a characteristic identifier.
///
/// Accepts a full hyphenated or simple UUID, or a 4/8 hex digit short form
/// with an optional `0x` prefix (`"2a19"`, `"0x2A19"`).
pub fn parse_uuid(value: &str) -> Result<Uuid> {
    let trimmed = value.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let invalid = || Error::InvalidUuid {
        value: value.to_string(),
    };

    match hex.len() {
        4 => u16::from_str_radix(hex, 16)
            .map(uuid_from_u16)
            .map_err(|_| invalid()),
        8 => u32::from_str_radix(hex, 16)
            .map(uuid_from_u32)
            .map_err(|_| invalid()),
        _ => Uuid::parse_str(trimmed).map_err(|_| invalid()),
    }
}
