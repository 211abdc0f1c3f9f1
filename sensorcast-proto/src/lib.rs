//! Sensorcast protocol - sensor payload layout and viewer events
//!
//! Two wire formats meet here: the raw bytes read from the sensor's GATT
//! characteristic ([`decode`]) and the named JSON events pushed to viewers
//! ([`Event`]).

pub mod ble;
mod reading;

pub use reading::{
    BATTERY_EMPTY_VOLTS, BATTERY_FULL_VOLTS, DecodeError, PAYLOAD_LEN, Reading, battery_percent,
    decode,
};

// Event names
pub const EVENT_SENSOR_DATA: &str = "sensor_data";
pub const EVENT_SERVER_RESPONSE: &str = "server_response";

/// Acknowledgement sent to every viewer right after it subscribes
pub const WELCOME_MESSAGE: &str = "Connected to server!";

/// Event pushed to a viewer
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A freshly decoded reading
    SensorData(Reading),
    /// Server notice, e.g. the connection acknowledgement
    ServerResponse { data: String },
}

impl Event {
    pub fn welcome() -> Self {
        Event::ServerResponse {
            data: WELCOME_MESSAGE.to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::SensorData(_) => EVENT_SENSOR_DATA,
            Event::ServerResponse { .. } => EVENT_SERVER_RESPONSE,
        }
    }

    /// JSON payload of the event, without the name
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            Event::SensorData(reading) => serde_json::to_string(reading),
            Event::ServerResponse { data } => {
                serde_json::to_string(&serde_json::json!({ "data": data }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_event() {
        let event = Event::welcome();
        assert_eq!(event.name(), "server_response");
        assert_eq!(event.to_json().unwrap(), r#"{"data":"Connected to server!"}"#);
    }

    #[test]
    fn sensor_data_event() {
        let reading = decode(&[0xE8, 0x03, 0x32, 0x14, 0x0B]).unwrap();
        let event = Event::SensorData(reading);
        assert_eq!(event.name(), "sensor_data");

        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["temperature"], 10.0);
        assert_eq!(json["humidity"], 50);
        assert_eq!(json["voltage"], 2.836);
        assert_eq!(json["battery"], 83);
    }
}
