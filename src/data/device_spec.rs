//! Declarative description of the peripheral to keep in sync.
//!
//! A [`DeviceSpec`] names the peripheral to connect to and the GATT
//! characteristics to translate into application-level properties.

use std::collections::BTreeMap;

use uuid::Uuid;

use super::converter::DataConverterKind;
use crate::error::{Error, Result};

/// How a property is accessed on the peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "String", into = "String"))]
pub enum AccessMode {
    /// Read the characteristic and report its converted value.
    ReadOnly,
    /// Write the default value, then read it back.
    ReadWrite,
    /// Subscribe to notifications or indications.
    NotifyOnly,
    /// A mode this crate does not know; such properties are skipped.
    Unrecognized(String),
}

impl AccessMode {
    /// Get the declarative name of this mode.
    pub fn as_str(&self) -> &str {
        match self {
            Self::ReadOnly => "ReadOnly",
            Self::ReadWrite => "ReadWrite",
            Self::NotifyOnly => "NotifyOnly",
            Self::Unrecognized(other) => other,
        }
    }
}

impl From<String> for AccessMode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "ReadOnly" => Self::ReadOnly,
            "ReadWrite" => Self::ReadWrite,
            "NotifyOnly" => Self::NotifyOnly,
            _ => Self::Unrecognized(value),
        }
    }
}

impl From<&str> for AccessMode {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<AccessMode> for String {
    fn from(mode: AccessMode) -> Self {
        match mode {
            AccessMode::Unrecognized(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity used to pick the target out of scan results.
///
/// Empty fields do not filter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct ProtocolIdentity {
    /// Advertised local name, matched exactly.
    pub name: String,
    /// Hardware address, matched ignoring ASCII case.
    pub mac_address: String,
}

impl ProtocolIdentity {
    /// Check whether a discovered peripheral is the one this identity names.
    pub fn matches(&self, local_name: Option<&str>, address: &str) -> bool {
        if !self.name.is_empty() && local_name != Some(self.name.as_str()) {
            return false;
        }

        if !self.mac_address.is_empty() && !self.mac_address.eq_ignore_ascii_case(address) {
            return false;
        }

        true
    }
}

/// Where and how a property lives on the peripheral.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct PropertyVisitor {
    /// Characteristic carrying the property.
    #[cfg_attr(feature = "serde", serde(deserialize_with = "deserialize_uuid"))]
    pub characteristic_uuid: Uuid,
    /// Payload layout for reads.
    #[cfg_attr(feature = "serde", serde(default))]
    pub data_converter: DataConverterKind,
    /// Raw payloads that can be written, keyed by label.
    #[cfg_attr(feature = "serde", serde(default))]
    pub data_write: BTreeMap<String, Vec<u8>>,
    /// Label of the payload written for a read-write property.
    #[cfg_attr(feature = "serde", serde(default))]
    pub default_value: String,
}

impl PropertyVisitor {
    /// Visitor for a characteristic with the default single-byte layout.
    pub fn new(characteristic_uuid: Uuid) -> Self {
        Self {
            characteristic_uuid,
            data_converter: DataConverterKind::default(),
            data_write: BTreeMap::new(),
            default_value: String::new(),
        }
    }
}

/// A single property of the device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct PropertyDefinition {
    /// Unique name, used as the status key.
    pub name: String,
    /// Access semantics.
    pub access_mode: AccessMode,
    /// Characteristic binding.
    pub visitor: PropertyVisitor,
}

impl PropertyDefinition {
    /// Create a property bound to a characteristic.
    pub fn new(name: impl Into<String>, access_mode: AccessMode, characteristic_uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            access_mode,
            visitor: PropertyVisitor::new(characteristic_uuid),
        }
    }

    /// Set the payload layout.
    pub fn with_converter(mut self, converter: DataConverterKind) -> Self {
        self.visitor.data_converter = converter;
        self
    }

    /// Add a labelled write payload.
    pub fn with_write_entry(mut self, label: impl Into<String>, payload: Vec<u8>) -> Self {
        self.visitor.data_write.insert(label.into(), payload);
        self
    }

    /// Set the label written by default.
    pub fn with_default_value(mut self, label: impl Into<String>) -> Self {
        self.visitor.default_value = label.into();
        self
    }

    /// Payload to write for the default value label.
    ///
    /// # Errors
    ///
    /// Fails if the write table is empty or has no entry for the default
    /// value label.
    pub fn default_write_payload(&self) -> Result<&[u8]> {
        if self.visitor.data_write.is_empty() {
            return Err(Error::EmptyWriteTable {
                property: self.name.clone(),
            });
        }

        self.visitor
            .data_write
            .get(&self.visitor.default_value)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::MissingWriteEntry {
                property: self.name.clone(),
                label: self.visitor.default_value.clone(),
            })
    }
}

/// Declarative target of a device.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct DeviceSpec {
    /// Which peripheral to connect to.
    pub protocol: ProtocolIdentity,
    /// Properties in declaration order.
    pub properties: Vec<PropertyDefinition>,
}

impl DeviceSpec {
    /// Create a spec for the given identity with no properties.
    pub fn new(protocol: ProtocolIdentity) -> Self {
        Self {
            protocol,
            properties: Vec::new(),
        }
    }

    /// Append a property.
    pub fn with_property(mut self, property: PropertyDefinition) -> Self {
        self.properties.push(property);
        self
    }

    /// Find the property bound to a characteristic.
    ///
    /// The first declared match wins if several properties share a UUID.
    pub fn find_property(&self, characteristic_uuid: &Uuid) -> Option<&PropertyDefinition> {
        self.properties
            .iter()
            .find(|p| p.visitor.characteristic_uuid == *characteristic_uuid)
    }

    /// Decode a spec from JSON.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(feature = "serde")]
fn deserialize_uuid<'de, D>(deserializer: D) -> std::result::Result<Uuid, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
    crate::ble::uuids::parse_uuid(&raw).map_err(serde::de::Error::custom)
}
