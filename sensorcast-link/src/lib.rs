//! Sensorcast BLE link
//!
//! Maintains the connection to one environmental sensor and reads its
//! characteristic at a fixed cadence.
//!
//! # Example
//!
//! ```ignore
//! use sensorcast_link::{LinkConfig, LinkError, LinkHandler, SensorLink};
//! use sensorcast_proto::Reading;
//!
//! struct Print;
//!
//! impl LinkHandler for Print {
//!     async fn on_reading(&mut self, reading: Reading) {
//!         println!("{reading:?}");
//!     }
//!
//!     fn on_error(&mut self, error: &LinkError) {
//!         eprintln!("{error}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = LinkConfig::new("A4:C1:38:BF:0B:36".parse().unwrap());
//!     let mut link = SensorLink::new(config.ble_device(), &config);
//!     let (_stop, mut shutdown) = tokio::sync::watch::channel(false);
//!     let _ = link.run(&mut shutdown, &mut Print).await;
//! }
//! ```

mod device;
mod error;
mod link;

pub use device::{BleDevice, DiscoveredDevice, SensorDevice, get_adapter, scan};
pub use error::{BleError, ErrorKind, LinkError};
pub use link::{
    ConnectionState, LinkConfig, LinkHandler, SensorLink, SessionEnd, wait_for_shutdown,
};

pub use btleplug::api::BDAddr;
