//! Per-characteristic access protocols.
//!
//! Each matched property is handled according to its access mode:
//!
//! - **read**: read, convert, report.
//! - **write**: write the default payload with acknowledgment, then read the
//!   characteristic back and report what the peripheral now holds. A write is
//!   only recorded once its effect has been observed.
//! - **subscribe**: register for notify/indicate deliveries and report each
//!   payload as it arrives.

use std::sync::Arc;
use tracing::{debug, trace};

use crate::ble::session::{BleSession, DiscoveredPeripheral, GattCharacteristic, NotificationHandler};
use crate::data::{DataConverter, PropertyDefinition, StatusStore};
use crate::error::Result;
use crate::utils::{format_reading, quote_bytes};

/// Runs the access protocols against one connected peripheral.
pub struct CharacteristicProcessor<'a> {
    session: &'a dyn BleSession,
    peripheral: &'a DiscoveredPeripheral,
    converter: &'a dyn DataConverter,
    status: &'a StatusStore,
}

impl<'a> CharacteristicProcessor<'a> {
    /// Create a processor for a connected peripheral.
    pub fn new(
        session: &'a dyn BleSession,
        peripheral: &'a DiscoveredPeripheral,
        converter: &'a dyn DataConverter,
        status: &'a StatusStore,
    ) -> Self {
        Self {
            session,
            peripheral,
            converter,
            status,
        }
    }

    /// Read and convert a characteristic, recording the value.
    ///
    /// Returns the formatted value.
    pub async fn read(
        &self,
        characteristic: &GattCharacteristic,
        property: &PropertyDefinition,
    ) -> Result<String> {
        let raw = self
            .session
            .read_characteristic(self.peripheral, characteristic)
            .await?;
        debug!(
            "Read {} from {}: {:02X?}",
            property.name, characteristic.uuid, raw
        );

        let value = self
            .converter
            .convert(&property.visitor.data_converter, &raw)?;
        let reported = format_reading(value);
        debug!("Converted {} to {}", property.name, reported);

        self.status.upsert(&property.name, "", &reported);
        Ok(reported)
    }

    /// Write the property's default payload and record the read-back value.
    ///
    /// # Errors
    ///
    /// Fails without touching the peripheral if the write table has no entry
    /// for the default value.
    pub async fn write(
        &self,
        characteristic: &GattCharacteristic,
        property: &PropertyDefinition,
    ) -> Result<()> {
        let payload = property.default_write_payload()?;

        self.session
            .write_characteristic(self.peripheral, characteristic, payload, true)
            .await?;
        debug!(
            "Wrote {} ({:?}) to {}",
            property.name, property.visitor.default_value, characteristic.uuid
        );

        let reported = self.read(characteristic, property).await?;
        self.status
            .upsert(&property.name, &property.visitor.default_value, &reported);
        Ok(())
    }

    /// Subscribe to a characteristic, recording every delivered payload.
    ///
    /// A characteristic that supports neither notify nor indicate is left
    /// alone; the property then never reports.
    pub async fn subscribe(
        &self,
        characteristic: &GattCharacteristic,
        property: &PropertyDefinition,
    ) -> Result<()> {
        let descriptors = self
            .session
            .discover_descriptors(self.peripheral, characteristic)
            .await?;
        trace!(
            "Characteristic {} has {} descriptors",
            characteristic.uuid,
            descriptors.len()
        );

        if !characteristic.can_notify() {
            debug!(
                "Characteristic {} for {} cannot notify, not subscribing",
                characteristic.uuid, property.name
            );
            return Ok(());
        }

        let status = self.status.clone();
        let name = property.name.clone();
        let handler: NotificationHandler = Arc::new(move |data: &[u8]| {
            trace!("Notified {}: {:02X?}", name, data);
            status.upsert(&name, "", &quote_bytes(data));
        });

        self.session
            .set_notify_value(self.peripheral, characteristic, handler)
            .await?;
        debug!("Subscribed {} to {}", property.name, characteristic.uuid);
        Ok(())
    }
}
