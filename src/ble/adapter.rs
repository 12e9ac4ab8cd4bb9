//! [`BleSession`] backed by a btleplug adapter.
//!
//! Adapter events are translated into [`SessionEvent`]s by a forwarding task.
//! Each connected peripheral gets a notification listener that fans values
//! out to the handlers registered for their characteristic.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::session::{
    AdapterState, Advertisement, BleSession, DiscoveredPeripheral, GattCharacteristic,
    GattService, NotificationHandler, SessionEvent, SessionEvents,
};
use crate::error::{Error, Result};

type Handlers = Arc<RwLock<HashMap<(String, Uuid), Vec<NotificationHandler>>>>;

/// BLE session over the platform adapter.
pub struct AdapterSession {
    /// The BLE adapter to use.
    adapter: Adapter,
    /// Peripherals seen since the session started, by identifier.
    peripherals: Arc<RwLock<HashMap<String, Peripheral>>>,
    /// Sender for the current cycle's events.
    event_tx: Arc<RwLock<Option<mpsc::UnboundedSender<SessionEvent>>>>,
    /// Handle to the adapter event forwarding task.
    event_handle: RwLock<Option<JoinHandle<()>>>,
    /// Notification handlers by peripheral and characteristic.
    handlers: Handlers,
    /// Notification listener tasks by peripheral identifier.
    listeners: RwLock<HashMap<String, JoinHandle<()>>>,
}

impl AdapterSession {
    /// Create a session on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a session on a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            peripherals: Arc::new(RwLock::new(HashMap::new())),
            event_tx: Arc::new(RwLock::new(None)),
            event_handle: RwLock::new(None),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    fn emit(&self, event: SessionEvent) {
        match self.event_tx.read().as_ref() {
            Some(tx) => {
                let _ = tx.send(event);
            }
            None => trace!("Dropping event, session not started: {:?}", event),
        }
    }

    fn handle(&self, peripheral: &DiscoveredPeripheral) -> Result<Peripheral> {
        self.peripherals
            .read()
            .get(&peripheral.id)
            .cloned()
            .ok_or_else(|| Error::PeripheralNotFound {
                identifier: peripheral.id.clone(),
            })
    }

    fn characteristic(
        handle: &Peripheral,
        characteristic: &GattCharacteristic,
    ) -> Result<Characteristic> {
        handle
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic.uuid && c.service_uuid == characteristic.service_uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: characteristic.uuid.to_string(),
            })
    }

    fn describe(id: &PeripheralId, properties: &PeripheralProperties) -> DiscoveredPeripheral {
        DiscoveredPeripheral {
            id: id.to_string(),
            address: properties.address.to_string(),
            local_name: properties.local_name.clone(),
        }
    }

    /// Translate an adapter event, if it is one the controller cares about.
    async fn translate(
        event: CentralEvent,
        adapter: &Adapter,
        peripherals: &Arc<RwLock<HashMap<String, Peripheral>>>,
    ) -> Option<SessionEvent> {
        match event {
            CentralEvent::StateUpdate(state) => {
                debug!("Adapter state changed: {:?}", state);
                Some(SessionEvent::AdapterStateChanged(state.into()))
            }
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                trace!("Device seen: {:?}", id);
                Self::process_peripheral(adapter, id, peripherals).await
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
                let handle = peripherals.read().get(&id.to_string()).cloned()?;
                let properties = handle.properties().await.ok().flatten().unwrap_or_default();
                Some(SessionEvent::PeripheralDisconnected {
                    peripheral: Self::describe(&id, &properties),
                    error: None,
                })
            }
            CentralEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
                None
            }
            _ => None,
        }
    }

    /// Build a discovery event and remember the peripheral handle.
    async fn process_peripheral(
        adapter: &Adapter,
        id: PeripheralId,
        peripherals: &Arc<RwLock<HashMap<String, Peripheral>>>,
    ) -> Option<SessionEvent> {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        let described = Self::describe(&id, &properties);
        peripherals.write().insert(described.id.clone(), peripheral);

        Some(SessionEvent::PeripheralDiscovered {
            peripheral: described,
            advertisement: Advertisement {
                local_name: properties.local_name,
                manufacturer_data: properties.manufacturer_data,
                services: properties.services,
                tx_power_level: properties.tx_power_level,
            },
            rssi: properties.rssi,
        })
    }

    /// Start fanning out notifications from a connected peripheral.
    async fn start_listener(&self, peripheral_id: String, handle: Peripheral) {
        let mut notifications = match handle.notifications().await {
            Ok(n) => n,
            Err(e) => {
                error!("Failed to get notifications stream: {}", e);
                return;
            }
        };

        let handlers = self.handlers.clone();
        let key = peripheral_id.clone();
        let task = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                trace!(
                    "Notification from {}: {} bytes",
                    notification.uuid,
                    notification.value.len()
                );

                let targets = handlers
                    .read()
                    .get(&(key.clone(), notification.uuid))
                    .cloned()
                    .unwrap_or_default();
                for handler in targets {
                    handler(&notification.value);
                }
            }
            debug!("Notification listener for {} stopped", key);
        });

        if let Some(previous) = self.listeners.write().insert(peripheral_id, task) {
            previous.abort();
        }
    }

    fn stop_listener(&self, peripheral_id: &str) {
        if let Some(task) = self.listeners.write().remove(peripheral_id) {
            task.abort();
        }
        self.handlers.write().retain(|(id, _), _| id != peripheral_id);
    }
}

#[async_trait]
impl BleSession for AdapterSession {
    async fn start(&self) -> Result<SessionEvents> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        // An adapter that cannot report its state was still handed to us by
        // the platform, so treat it as usable.
        let state = match self.adapter.adapter_state().await {
            Ok(state) => AdapterState::from(state),
            Err(e) => {
                debug!("Adapter state unavailable, assuming powered on: {}", e);
                AdapterState::PoweredOn
            }
        };
        let _ = tx.send(SessionEvent::AdapterStateChanged(state));

        *self.event_tx.write() = Some(tx.clone());

        let adapter = self.adapter.clone();
        let peripherals = self.peripherals.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Some(event) = Self::translate(event, &adapter, &peripherals).await {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            }
            debug!("Adapter event loop ended");
        });

        if let Some(previous) = self.event_handle.write().replace(handle) {
            previous.abort();
        }

        info!("BLE session started, adapter {}", state);
        Ok(rx)
    }

    async fn stop(&self) -> Result<()> {
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Stop scan during teardown failed: {}", e);
        }

        let listening: Vec<String> = self.listeners.read().keys().cloned().collect();
        for id in listening {
            self.stop_listener(&id);
            let handle = self.peripherals.read().get(&id).cloned();
            if let Some(handle) = handle {
                if handle.is_connected().await.unwrap_or(false) {
                    if let Err(e) = handle.disconnect().await {
                        warn!("Failed to disconnect {} during teardown: {}", id, e);
                    }
                }
            }
        }

        *self.event_tx.write() = None;
        let handle = self.event_handle.write().take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.peripherals.write().clear();

        debug!("BLE session stopped");
        Ok(())
    }

    async fn scan(&self, services: Vec<Uuid>) -> Result<()> {
        info!("Starting BLE scan");
        self.adapter
            .start_scan(ScanFilter { services })
            .await
            .map_err(Error::Bluetooth)
    }

    async fn stop_scanning(&self) -> Result<()> {
        info!("Stopping BLE scan");
        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }

    async fn connect(&self, peripheral: &DiscoveredPeripheral) -> Result<()> {
        let handle = self.handle(peripheral)?;

        debug!("Connecting to {}", peripheral);
        let error = match handle.connect().await {
            Ok(()) => {
                self.start_listener(peripheral.id.clone(), handle).await;
                None
            }
            Err(e) => Some(e.to_string()),
        };

        self.emit(SessionEvent::PeripheralConnected {
            peripheral: peripheral.clone(),
            error,
        });
        Ok(())
    }

    async fn cancel_connection(&self, peripheral: &DiscoveredPeripheral) -> Result<()> {
        let handle = self.handle(peripheral)?;

        self.stop_listener(&peripheral.id);
        handle.disconnect().await.map_err(Error::Bluetooth)?;

        // Not every backend reports locally initiated disconnects.
        self.emit(SessionEvent::PeripheralDisconnected {
            peripheral: peripheral.clone(),
            error: None,
        });
        Ok(())
    }

    async fn set_mtu(&self, _peripheral: &DiscoveredPeripheral, mtu: u16) -> Result<()> {
        Err(Error::NotSupported {
            operation: format!("explicit MTU negotiation ({} bytes)", mtu),
        })
    }

    async fn discover_services(&self, peripheral: &DiscoveredPeripheral) -> Result<Vec<GattService>> {
        let handle = self.handle(peripheral)?;
        handle.discover_services().await.map_err(Error::Bluetooth)?;

        let services: Vec<GattService> = handle
            .services()
            .into_iter()
            .map(|s| GattService {
                uuid: s.uuid,
                primary: s.primary,
            })
            .collect();

        debug!("Discovered {} services on {}", services.len(), peripheral);
        Ok(services)
    }

    async fn discover_characteristics(
        &self,
        peripheral: &DiscoveredPeripheral,
        service: &GattService,
    ) -> Result<Vec<GattCharacteristic>> {
        let handle = self.handle(peripheral)?;

        let characteristics: Vec<GattCharacteristic> = handle
            .services()
            .into_iter()
            .filter(|s| s.uuid == service.uuid)
            .flat_map(|s| s.characteristics)
            .map(|c| GattCharacteristic::new(c.uuid, c.service_uuid, c.properties))
            .collect();

        for characteristic in &characteristics {
            trace!(
                "Found characteristic: {} in service {}",
                characteristic.uuid,
                service.uuid
            );
        }

        Ok(characteristics)
    }

    async fn discover_descriptors(
        &self,
        peripheral: &DiscoveredPeripheral,
        characteristic: &GattCharacteristic,
    ) -> Result<Vec<Uuid>> {
        let handle = self.handle(peripheral)?;
        let found = Self::characteristic(&handle, characteristic)?;
        Ok(found.descriptors.iter().map(|d| d.uuid).collect())
    }

    async fn read_characteristic(
        &self,
        peripheral: &DiscoveredPeripheral,
        characteristic: &GattCharacteristic,
    ) -> Result<Vec<u8>> {
        let handle = self.handle(peripheral)?;
        let found = Self::characteristic(&handle, characteristic)?;

        let data = handle.read(&found).await.map_err(Error::Bluetooth)?;
        trace!("Read {} bytes from characteristic {}", data.len(), found.uuid);

        Ok(data)
    }

    async fn write_characteristic(
        &self,
        peripheral: &DiscoveredPeripheral,
        characteristic: &GattCharacteristic,
        data: &[u8],
        with_response: bool,
    ) -> Result<()> {
        let handle = self.handle(peripheral)?;
        let found = Self::characteristic(&handle, characteristic)?;

        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        handle
            .write(&found, data, write_type)
            .await
            .map_err(Error::Bluetooth)?;
        trace!("Wrote {} bytes to characteristic {}", data.len(), found.uuid);

        Ok(())
    }

    async fn set_notify_value(
        &self,
        peripheral: &DiscoveredPeripheral,
        characteristic: &GattCharacteristic,
        handler: NotificationHandler,
    ) -> Result<()> {
        let handle = self.handle(peripheral)?;
        let found = Self::characteristic(&handle, characteristic)?;

        self.handlers
            .write()
            .entry((peripheral.id.clone(), found.uuid))
            .or_default()
            .push(handler);

        if let Err(e) = handle.subscribe(&found).await {
            debug!("Failed to subscribe to {}: {:?}", found.uuid, e);
            self.handlers
                .write()
                .remove(&(peripheral.id.clone(), found.uuid));
            return Err(Error::Bluetooth(e));
        }

        debug!("Subscribed to notifications from {}", found.uuid);
        Ok(())
    }
}

impl Drop for AdapterSession {
    fn drop(&mut self) {
        if let Some(handle) = self.event_handle.get_mut().take() {
            handle.abort();
        }
        for (_, task) in self.listeners.get_mut().drain() {
            task.abort();
        }
    }
}
