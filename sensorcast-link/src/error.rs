use std::time::Duration;

/// Coarse classification used for logging and for deciding whether a
/// failure ends the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connect,
    Read,
    Decode,
    Disconnect,
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("failed to connect: {0}")]
    Connect(Box<dyn std::error::Error + Send + Sync>),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("characteristic read failed: {0}")]
    Read(Box<dyn std::error::Error + Send + Sync>),
    #[error("bad payload: {0}")]
    Decode(#[from] sensorcast_proto::DecodeError),
    #[error("disconnect failed: {0}")]
    Disconnect(Box<dyn std::error::Error + Send + Sync>),
}

impl LinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LinkError::Connect(_) | LinkError::ConnectTimeout(_) => ErrorKind::Connect,
            LinkError::Read(_) => ErrorKind::Read,
            LinkError::Decode(_) => ErrorKind::Decode,
            LinkError::Disconnect(_) => ErrorKind::Disconnect,
        }
    }
}

/// Failures of the btleplug backed device, before they are classified
/// into a [`LinkError`] by the session loop.
#[derive(Debug, thiserror::Error)]
pub enum BleError {
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(uuid::Uuid),
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Btleplug(#[from] btleplug::Error),
}
