extern crate self as sensorcast_hub;

pub mod acquisition;
mod assets;
pub mod http;
mod registry;
mod sse;

pub use acquisition::{AcquisitionHandle, AcquisitionReport, Outcome, ReconnectPolicy};
pub use http::{Server, ServerConfig, ServeError};
pub use registry::{BroadcastReport, Registry, SubscriberId, SubscriberSendError, Subscription};
