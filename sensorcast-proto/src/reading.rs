//! Sensor payload decoding

use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Minimum payload length: i16 temperature + u8 humidity + u16 voltage
pub const PAYLOAD_LEN: usize = 5;

/// Battery voltage mapped to 0%
pub const BATTERY_EMPTY_VOLTS: f64 = 2.0;

/// Battery voltage mapped to 100%
pub const BATTERY_FULL_VOLTS: f64 = 3.0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload too short: {len} bytes (need {})", PAYLOAD_LEN)]
    TooShort { len: usize },
}

/// One decoded sample from the sensor
///
/// `battery` is not stored; it is always derived from `voltage`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Degrees Celsius, two decimals
    pub temperature: f64,
    /// Relative humidity, percent. Not range checked.
    pub humidity: u8,
    /// Battery voltage in volts, three decimals
    pub voltage: f64,
}

impl Reading {
    /// Battery level in percent, derived from `voltage`
    pub fn battery(&self) -> i32 {
        battery_percent(self.voltage)
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Reading", 4)?;
        s.serialize_field("temperature", &self.temperature)?;
        s.serialize_field("humidity", &self.humidity)?;
        s.serialize_field("voltage", &self.voltage)?;
        s.serialize_field("battery", &self.battery())?;
        s.end()
    }
}

/// Linear map of `voltage` onto 2.0V..3.0V, rounded to two decimals and then
/// truncated toward zero. Not clamped: 1.9V gives -10, 3.2V gives 120.
pub fn battery_percent(voltage: f64) -> i32 {
    let pct = (voltage - BATTERY_EMPTY_VOLTS) / (BATTERY_FULL_VOLTS - BATTERY_EMPTY_VOLTS) * 100.0;
    let rounded = (pct * 100.0).round() / 100.0;
    rounded.trunc() as i32
}

/// Decode a raw characteristic value.
///
/// Layout (little-endian):
/// - `[0..2]` temperature, i16, hundredths of a degree
/// - `[2]`    humidity, u8, percent
/// - `[3..5]` voltage, u16, millivolts
///
/// Trailing bytes are ignored.
pub fn decode(data: &[u8]) -> Result<Reading, DecodeError> {
    if data.len() < PAYLOAD_LEN {
        return Err(DecodeError::TooShort { len: data.len() });
    }

    let temperature = i16::from_le_bytes([data[0], data[1]]);
    let humidity = data[2];
    let voltage = u16::from_le_bytes([data[3], data[4]]);

    Ok(Reading {
        temperature: f64::from(temperature) / 100.0,
        humidity,
        voltage: f64::from(voltage) / 1000.0,
    })
}
