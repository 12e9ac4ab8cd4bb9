//! Scripted in-memory BLE session for driving a `Device` end to end.

#![allow(dead_code)]

use async_trait::async_trait;
use ble_device_sync::ble::{
    AdapterState, Advertisement, BleSession, DiscoveredPeripheral, GattCharacteristic, GattService,
    NotificationHandler, SessionEvent, SessionEvents, CLIENT_CHARACTERISTIC_CONFIG_UUID,
};
use ble_device_sync::{Error, Result};
use btleplug::api::CharPropFlags;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const SERVICE: Uuid = Uuid::from_u128(0xfff0);

/// A session call, recorded in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Start,
    Stop,
    Scan,
    StopScanning,
    Connect(String),
    CancelConnection(String),
    Read(Uuid),
    Write(Uuid, Vec<u8>),
    Subscribe(Uuid),
}

#[derive(Debug, Clone)]
pub struct FakeCharacteristic {
    pub uuid: Uuid,
    pub properties: CharPropFlags,
    pub value: Vec<u8>,
    /// Value held after any write; the written bytes if unset.
    pub after_write: Option<Vec<u8>>,
    pub read_fails: bool,
    /// Reads never complete.
    pub read_stalls: bool,
    /// Payloads delivered one per 100ms once subscribed.
    pub notifications: Vec<Vec<u8>>,
}

impl FakeCharacteristic {
    pub fn readable(uuid: Uuid, value: Vec<u8>) -> Self {
        Self {
            uuid,
            properties: CharPropFlags::READ | CharPropFlags::WRITE,
            value,
            after_write: None,
            read_fails: false,
            read_stalls: false,
            notifications: Vec::new(),
        }
    }

    pub fn notifying(uuid: Uuid, notifications: Vec<Vec<u8>>) -> Self {
        Self {
            uuid,
            properties: CharPropFlags::READ | CharPropFlags::NOTIFY,
            value: Vec::new(),
            after_write: None,
            read_fails: false,
            read_stalls: false,
            notifications,
        }
    }

    pub fn with_properties(mut self, properties: CharPropFlags) -> Self {
        self.properties = properties;
        self
    }

    pub fn stalling(mut self) -> Self {
        self.read_stalls = true;
        self
    }

    pub fn with_after_write(mut self, value: Vec<u8>) -> Self {
        self.after_write = Some(value);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FakePeripheral {
    pub peripheral: DiscoveredPeripheral,
    pub advertisement: Advertisement,
    pub characteristics: Vec<FakeCharacteristic>,
}

impl FakePeripheral {
    pub fn new(id: &str, address: &str, name: &str) -> Self {
        Self {
            peripheral: DiscoveredPeripheral::new(id, address).with_local_name(name),
            advertisement: Advertisement::named(name),
            characteristics: Vec::new(),
        }
    }

    pub fn with_characteristic(mut self, characteristic: FakeCharacteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }
}

#[derive(Default)]
struct Inner {
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    values: HashMap<Uuid, Vec<u8>>,
    calls: Vec<Call>,
    /// Peripheral currently holding a link.
    connected: Option<String>,
}

/// A session whose adapter is always powered on and whose peripherals
/// answer every request immediately.
pub struct FakeSession {
    peripherals: Vec<FakePeripheral>,
    inner: Mutex<Inner>,
}

impl FakeSession {
    pub fn new(peripherals: Vec<FakePeripheral>) -> Self {
        Self {
            peripherals,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn connected(&self) -> Option<String> {
        self.inner.lock().connected.clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.inner.lock().calls.iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: Call) {
        self.inner.lock().calls.push(call);
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = self.inner.lock().events.as_ref() {
            let _ = tx.send(event);
        }
    }

    fn characteristic(&self, peripheral: &DiscoveredPeripheral, uuid: Uuid) -> Result<&FakeCharacteristic> {
        self.peripherals
            .iter()
            .filter(|p| p.peripheral.id == peripheral.id)
            .flat_map(|p| p.characteristics.iter())
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }
}

#[async_trait]
impl BleSession for FakeSession {
    async fn start(&self) -> Result<SessionEvents> {
        self.record(Call::Start);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(SessionEvent::AdapterStateChanged(AdapterState::PoweredOn));
        self.inner.lock().events = Some(tx);
        Ok(rx)
    }

    async fn stop(&self) -> Result<()> {
        self.record(Call::Stop);
        let mut inner = self.inner.lock();
        inner.events = None;
        inner.connected = None;
        Ok(())
    }

    async fn scan(&self, _services: Vec<Uuid>) -> Result<()> {
        self.record(Call::Scan);
        for p in &self.peripherals {
            self.emit(SessionEvent::PeripheralDiscovered {
                peripheral: p.peripheral.clone(),
                advertisement: p.advertisement.clone(),
                rssi: Some(-55),
            });
        }
        Ok(())
    }

    async fn stop_scanning(&self) -> Result<()> {
        self.record(Call::StopScanning);
        Ok(())
    }

    async fn connect(&self, peripheral: &DiscoveredPeripheral) -> Result<()> {
        self.record(Call::Connect(peripheral.id.clone()));
        self.inner.lock().connected = Some(peripheral.id.clone());
        self.emit(SessionEvent::PeripheralConnected {
            peripheral: peripheral.clone(),
            error: None,
        });
        Ok(())
    }

    async fn cancel_connection(&self, peripheral: &DiscoveredPeripheral) -> Result<()> {
        self.record(Call::CancelConnection(peripheral.id.clone()));
        self.inner.lock().connected = None;
        self.emit(SessionEvent::PeripheralDisconnected {
            peripheral: peripheral.clone(),
            error: None,
        });
        Ok(())
    }

    async fn set_mtu(&self, _peripheral: &DiscoveredPeripheral, _mtu: u16) -> Result<()> {
        Ok(())
    }

    async fn discover_services(&self, _peripheral: &DiscoveredPeripheral) -> Result<Vec<GattService>> {
        Ok(vec![GattService {
            uuid: SERVICE,
            primary: true,
        }])
    }

    async fn discover_characteristics(
        &self,
        peripheral: &DiscoveredPeripheral,
        _service: &GattService,
    ) -> Result<Vec<GattCharacteristic>> {
        Ok(self
            .peripherals
            .iter()
            .filter(|p| p.peripheral.id == peripheral.id)
            .flat_map(|p| p.characteristics.iter())
            .map(|c| GattCharacteristic::new(c.uuid, SERVICE, c.properties))
            .collect())
    }

    async fn discover_descriptors(
        &self,
        peripheral: &DiscoveredPeripheral,
        characteristic: &GattCharacteristic,
    ) -> Result<Vec<Uuid>> {
        let fake = self.characteristic(peripheral, characteristic.uuid)?;
        if fake.properties.contains(CharPropFlags::NOTIFY) {
            Ok(vec![CLIENT_CHARACTERISTIC_CONFIG_UUID])
        } else {
            Ok(Vec::new())
        }
    }

    async fn read_characteristic(
        &self,
        peripheral: &DiscoveredPeripheral,
        characteristic: &GattCharacteristic,
    ) -> Result<Vec<u8>> {
        self.record(Call::Read(characteristic.uuid));
        let fake = self.characteristic(peripheral, characteristic.uuid)?;
        if fake.read_fails {
            return Err(Error::NotConnected);
        }
        if fake.read_stalls {
            std::future::pending::<()>().await;
        }

        let written = self.inner.lock().values.get(&fake.uuid).cloned();
        Ok(written.unwrap_or_else(|| fake.value.clone()))
    }

    async fn write_characteristic(
        &self,
        peripheral: &DiscoveredPeripheral,
        characteristic: &GattCharacteristic,
        data: &[u8],
        _with_response: bool,
    ) -> Result<()> {
        self.record(Call::Write(characteristic.uuid, data.to_vec()));
        let fake = self.characteristic(peripheral, characteristic.uuid)?;
        let held = fake.after_write.clone().unwrap_or_else(|| data.to_vec());
        self.inner.lock().values.insert(fake.uuid, held);
        Ok(())
    }

    async fn set_notify_value(
        &self,
        peripheral: &DiscoveredPeripheral,
        characteristic: &GattCharacteristic,
        handler: NotificationHandler,
    ) -> Result<()> {
        self.record(Call::Subscribe(characteristic.uuid));
        let notifications = self
            .characteristic(peripheral, characteristic.uuid)?
            .notifications
            .clone();

        tokio::spawn(async move {
            for payload in notifications {
                tokio::time::sleep(Duration::from_millis(100)).await;
                handler(&payload);
            }
        });
        Ok(())
    }
}
