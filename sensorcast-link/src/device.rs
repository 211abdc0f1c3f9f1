//! Sensor device abstraction and its btleplug implementation

use std::future::Future;
use std::time::Duration;

use btleplug::api::{BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::BleError;

/// How often the peripheral list is checked while scanning for the sensor
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A readable sensor. Implemented by [`BleDevice`] for real hardware.
///
/// Calls are never issued concurrently: the session loop owns the device
/// exclusively and awaits each call before making the next.
pub trait SensorDevice: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Establish the link. Timeouts are applied by the caller.
    fn connect(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Read the raw characteristic value once
    fn read(&mut self) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Whether the device still considers the link up. An `Err` means the
    /// state could not be queried, not that the link is gone.
    fn is_connected(&mut self) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, BleError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(BleError::NoAdapter)
}

/// A peripheral seen during a scan
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub name: String,
    pub address: BDAddr,
    pub rssi: Option<i16>,
}

/// Scan for BLE devices for `duration`, to find the sensor's address
pub async fn scan(duration: Duration) -> Result<Vec<DiscoveredDevice>, BleError> {
    let adapter = get_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let devices = discovered(&adapter).await;
    adapter.stop_scan().await?;
    devices
}

async fn discovered(adapter: &Adapter) -> Result<Vec<DiscoveredDevice>, BleError> {
    let mut devices = Vec::new();
    for peripheral in adapter.peripherals().await? {
        if let Some(props) = peripheral.properties().await? {
            devices.push(DiscoveredDevice {
                name: props.local_name.unwrap_or_else(|| "Unknown".to_string()),
                address: peripheral.address(),
                rssi: props.rssi,
            });
        }
    }
    Ok(devices)
}

/// Sensor reached over BLE, identified by its device address
pub struct BleDevice {
    address: BDAddr,
    characteristic_uuid: Uuid,
    /// Set from the start of `connect` until `disconnect`, so a scan left
    /// running by an abandoned connect can still be stopped
    adapter: Option<Adapter>,
    peripheral: Option<Peripheral>,
    characteristic: Option<Characteristic>,
}

impl BleDevice {
    pub fn new(address: BDAddr, characteristic_uuid: Uuid) -> Self {
        Self {
            address,
            characteristic_uuid,
            adapter: None,
            peripheral: None,
            characteristic: None,
        }
    }

    pub fn address(&self) -> BDAddr {
        self.address
    }

    /// Scan until a peripheral with our address shows up. Runs until found;
    /// the caller bounds it with a timeout. If the future is dropped the scan
    /// keeps running until `disconnect` stops it.
    async fn find_peripheral(&self, adapter: &Adapter) -> Result<Peripheral, BleError> {
        adapter.start_scan(ScanFilter::default()).await?;

        let found = self.poll_peripherals(adapter).await;
        adapter.stop_scan().await?;

        let found = found?;
        debug!("found peripheral {}", self.address);
        Ok(found)
    }

    async fn poll_peripherals(&self, adapter: &Adapter) -> Result<Peripheral, BleError> {
        loop {
            let peripherals = adapter.peripherals().await?;
            if let Some(p) = peripherals.into_iter().find(|p| p.address() == self.address) {
                return Ok(p);
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        }
    }
}

impl SensorDevice for BleDevice {
    type Error = BleError;

    async fn connect(&mut self) -> Result<(), BleError> {
        let adapter = get_adapter().await?;
        self.adapter = Some(adapter.clone());
        let peripheral = self.find_peripheral(&adapter).await?;

        peripheral.connect().await?;
        // Keep the handle even if discovery fails so disconnect can clean up
        self.peripheral = Some(peripheral.clone());

        peripheral.discover_services().await?;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == self.characteristic_uuid)
            .ok_or(BleError::CharacteristicNotFound(self.characteristic_uuid))?;

        info!(
            "connected to {} (characteristic {})",
            self.address, self.characteristic_uuid
        );
        self.characteristic = Some(characteristic);
        Ok(())
    }

    async fn read(&mut self) -> Result<Vec<u8>, BleError> {
        match (&self.peripheral, &self.characteristic) {
            (Some(peripheral), Some(characteristic)) => Ok(peripheral.read(characteristic).await?),
            _ => Err(BleError::NotConnected),
        }
    }

    async fn disconnect(&mut self) -> Result<(), BleError> {
        self.characteristic = None;
        if let Some(adapter) = self.adapter.take() {
            // harmless when no scan is running
            if let Err(e) = adapter.stop_scan().await {
                debug!("stop_scan on disconnect: {e}");
            }
        }
        match self.peripheral.take() {
            Some(peripheral) => {
                if peripheral.is_connected().await? {
                    peripheral.disconnect().await?;
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn is_connected(&mut self) -> Result<bool, BleError> {
        match &self.peripheral {
            Some(peripheral) => Ok(peripheral.is_connected().await?),
            None => Ok(false),
        }
    }
}
