//! BLE GATT constants for the environmental sensor
//!
//! The sensor exposes a single readable characteristic carrying a 5 byte
//! little-endian payload: temperature (i16, x100), humidity (u8) and
//! battery voltage (u16, x1000). See [`crate::decode`].

use std::time::Duration;
use uuid::Uuid;

/// Temperature/humidity/voltage characteristic: ebe0ccc1-7a0a-4b0c-8a1a-6ff2997da3a6
pub const READING_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xebe0ccc1_7a0a_4b0c_8a1a_6ff2997da3a6);

/// Upper bound for scan + connect + service discovery
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between two characteristic reads
pub const DEFAULT_READ_INTERVAL: Duration = Duration::from_secs(1);
