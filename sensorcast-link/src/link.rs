//! Session loop: connect once, read at a fixed cadence, disconnect once

use std::future::Future;
use std::time::Duration;

use btleplug::api::BDAddr;
use sensorcast_proto::{Reading, ble, decode};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::device::{BleDevice, SensorDevice};
use crate::error::LinkError;

/// Where the sensor is and how often to read it
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub address: BDAddr,
    pub characteristic: Uuid,
    pub connect_timeout: Duration,
    pub interval: Duration,
}

impl LinkConfig {
    pub fn new(address: BDAddr) -> Self {
        Self {
            address,
            characteristic: ble::READING_CHARACTERISTIC_UUID,
            connect_timeout: ble::DEFAULT_CONNECT_TIMEOUT,
            interval: ble::DEFAULT_READ_INTERVAL,
        }
    }

    pub fn ble_device(&self) -> BleDevice {
        BleDevice::new(self.address, self.characteristic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reading,
}

/// Why a session that did connect came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Shutdown was requested
    Shutdown,
    /// The device reported the link as lost
    Dropped,
}

/// Receives the outcome of every read. Errors passed here never end the
/// session, except the connect error which is also returned from
/// [`SensorLink::run`].
pub trait LinkHandler: Send {
    fn on_reading(&mut self, reading: Reading) -> impl Future<Output = ()> + Send;

    fn on_error(&mut self, error: &LinkError);
}

/// Owns the device exclusively for the lifetime of a session
pub struct SensorLink<D> {
    device: D,
    connect_timeout: Duration,
    interval: Duration,
    state: ConnectionState,
}

impl<D: SensorDevice> SensorLink<D> {
    pub fn new(device: D, config: &LinkConfig) -> Self {
        Self {
            device,
            connect_timeout: config.connect_timeout,
            interval: config.interval,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Run one session until shutdown or link loss.
    ///
    /// Read and decode failures are reported to `handler` and the loop moves
    /// on to the next tick. A failed or timed out connect ends the session with
    /// an error. Whatever the outcome, `disconnect` is called exactly once.
    pub async fn run<H: LinkHandler>(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        handler: &mut H,
    ) -> Result<SessionEnd, LinkError> {
        self.state = ConnectionState::Connecting;
        info!("connecting (timeout {:?})", self.connect_timeout);

        let connect_timeout = self.connect_timeout;
        let connected = tokio::select! {
            r = tokio::time::timeout(connect_timeout, self.device.connect()) => Some(r),
            _ = wait_for_shutdown(shutdown) => None,
        };

        let end = match connected {
            None => {
                info!("shutdown requested while connecting");
                Ok(SessionEnd::Shutdown)
            }
            Some(Ok(Ok(()))) => {
                self.state = ConnectionState::Connected;
                info!("sensor connected");
                Ok(self.read_loop(shutdown, handler).await)
            }
            Some(Ok(Err(e))) => Err(LinkError::Connect(Box::new(e))),
            Some(Err(_)) => Err(LinkError::ConnectTimeout(connect_timeout)),
        };

        if let Err(e) = &end {
            error!("{e}");
            handler.on_error(e);
        }

        self.disconnect(handler).await;
        end
    }

    async fn read_loop<H: LinkHandler>(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
        handler: &mut H,
    ) -> SessionEnd {
        loop {
            if *shutdown.borrow() {
                return SessionEnd::Shutdown;
            }
            match self.device.is_connected().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("sensor link lost");
                    return SessionEnd::Dropped;
                }
                // the read below decides
                Err(e) => warn!("could not query link state: {e}"),
            }

            self.state = ConnectionState::Reading;
            match self.read_once().await {
                Ok(reading) => {
                    debug!(
                        "reading: {}C {}% {}V ({}%)",
                        reading.temperature,
                        reading.humidity,
                        reading.voltage,
                        reading.battery()
                    );
                    handler.on_reading(reading).await;
                }
                Err(e) => {
                    warn!("{e}");
                    handler.on_error(&e);
                }
            }
            self.state = ConnectionState::Connected;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = wait_for_shutdown(shutdown) => return SessionEnd::Shutdown,
            }
        }
    }

    async fn read_once(&mut self) -> Result<Reading, LinkError> {
        let raw = self
            .device
            .read()
            .await
            .map_err(|e| LinkError::Read(Box::new(e)))?;
        Ok(decode(&raw)?)
    }

    async fn disconnect<H: LinkHandler>(&mut self, handler: &mut H) {
        match self.device.disconnect().await {
            Ok(()) => info!("sensor disconnected"),
            Err(e) => {
                let e = LinkError::Disconnect(Box::new(e));
                warn!("{e}");
                handler.on_error(&e);
            }
        }
        self.state = ConnectionState::Disconnected;
    }
}

/// Resolves once shutdown is set, or once every sender is gone
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // Err: every sender dropped, treated as shutdown
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    #[derive(Debug, Clone, thiserror::Error)]
    #[error("{0}")]
    struct TestError(&'static str);

    /// Plays back a fixed list of read results, then reports the link lost
    #[derive(Default)]
    struct ScriptedDevice {
        fail_connect: bool,
        hang_connect: bool,
        fail_disconnect: bool,
        /// `is_connected` fails this many times before answering
        failed_link_queries: usize,
        reads: VecDeque<Result<Vec<u8>, TestError>>,
        connected: bool,
        /// Set while a connect is in flight, cleared by disconnect
        scanning: bool,
        connects: usize,
        disconnects: usize,
    }

    impl ScriptedDevice {
        fn with_reads(reads: Vec<Result<Vec<u8>, TestError>>) -> Self {
            Self {
                reads: reads.into(),
                ..Default::default()
            }
        }
    }

    impl SensorDevice for ScriptedDevice {
        type Error = TestError;

        async fn connect(&mut self) -> Result<(), TestError> {
            self.connects += 1;
            self.scanning = true;
            if self.hang_connect {
                std::future::pending::<()>().await;
            }
            if self.fail_connect {
                return Err(TestError("no such device"));
            }
            self.scanning = false;
            self.connected = true;
            Ok(())
        }

        async fn read(&mut self) -> Result<Vec<u8>, TestError> {
            self.reads.pop_front().unwrap_or(Err(TestError("script exhausted")))
        }

        async fn disconnect(&mut self) -> Result<(), TestError> {
            self.disconnects += 1;
            self.connected = false;
            self.scanning = false;
            if self.fail_disconnect {
                return Err(TestError("already gone"));
            }
            Ok(())
        }

        async fn is_connected(&mut self) -> Result<bool, TestError> {
            if self.failed_link_queries > 0 {
                self.failed_link_queries -= 1;
                return Err(TestError("property query failed"));
            }
            Ok(self.connected && !self.reads.is_empty())
        }
    }

    #[derive(Default)]
    struct Collect {
        readings: Vec<(Reading, Instant)>,
        errors: Vec<ErrorKind>,
        stop_after: Option<(usize, watch::Sender<bool>)>,
    }

    impl LinkHandler for Collect {
        async fn on_reading(&mut self, reading: Reading) {
            self.readings.push((reading, Instant::now()));
            if let Some((n, tx)) = &self.stop_after {
                if self.readings.len() >= *n {
                    tx.send(true).unwrap();
                }
            }
        }

        fn on_error(&mut self, error: &LinkError) {
            self.errors.push(error.kind());
        }
    }

    const GOOD: [u8; 5] = [0xE8, 0x03, 0x32, 0x14, 0x0B];

    fn config() -> LinkConfig {
        LinkConfig::new(BDAddr::from([0xA4, 0xC1, 0x38, 0xBF, 0x0B, 0x36]))
    }

    #[tokio::test(start_paused = true)]
    async fn reads_until_link_lost() {
        let device = ScriptedDevice::with_reads(vec![Ok(GOOD.to_vec()), Ok(GOOD.to_vec())]);
        let mut link = SensorLink::new(device, &config());
        let (_tx, mut rx) = watch::channel(false);
        let mut handler = Collect::default();

        let end = link.run(&mut rx, &mut handler).await.unwrap();

        assert_eq!(end, SessionEnd::Dropped);
        assert_eq!(handler.readings.len(), 2);
        assert_eq!(handler.readings[0].0.battery(), 83);
        assert!(handler.errors.is_empty());
        assert_eq!(link.device().disconnects, 1);
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn read_failures_do_not_end_session() {
        let device = ScriptedDevice::with_reads(vec![
            Err(TestError("gatt error")),
            Err(TestError("gatt error")),
            Err(TestError("gatt error")),
            Ok(GOOD.to_vec()),
            Ok(GOOD.to_vec()),
        ]);
        let mut link = SensorLink::new(device, &config());
        let (tx, mut rx) = watch::channel(false);
        let mut handler = Collect {
            stop_after: Some((1, tx)),
            ..Default::default()
        };

        let end = link.run(&mut rx, &mut handler).await.unwrap();

        assert_eq!(end, SessionEnd::Shutdown);
        assert_eq!(handler.errors, vec![ErrorKind::Read; 3]);
        assert_eq!(handler.readings.len(), 1);
        assert_eq!(handler.readings[0].0.temperature, 10.0);
        assert_eq!(link.device().connects, 1);
        assert_eq!(link.device().disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn short_payload_is_a_decode_error() {
        let device = ScriptedDevice::with_reads(vec![
            Ok(vec![0xE8, 0x03]),
            Ok(GOOD.to_vec()),
            Ok(GOOD.to_vec()),
        ]);
        let mut link = SensorLink::new(device, &config());
        let (_tx, mut rx) = watch::channel(false);
        let mut handler = Collect::default();

        link.run(&mut rx, &mut handler).await.unwrap();

        assert_eq!(handler.errors, vec![ErrorKind::Decode]);
        assert_eq!(handler.readings.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reads_are_spaced_by_interval() {
        let device = ScriptedDevice::with_reads(vec![Ok(GOOD.to_vec()); 4]);
        let mut link = SensorLink::new(device, &config());
        let (_tx, mut rx) = watch::channel(false);
        let mut handler = Collect::default();

        link.run(&mut rx, &mut handler).await.unwrap();

        assert_eq!(handler.readings.len(), 4);
        for pair in handler.readings.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_ends_session() {
        let device = ScriptedDevice {
            fail_connect: true,
            ..ScriptedDevice::with_reads(vec![Ok(GOOD.to_vec())])
        };
        let mut link = SensorLink::new(device, &config());
        let (_tx, mut rx) = watch::channel(false);
        let mut handler = Collect::default();

        let err = link.run(&mut rx, &mut handler).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Connect);
        assert_eq!(handler.errors, vec![ErrorKind::Connect]);
        assert!(handler.readings.is_empty());
        assert_eq!(link.device().disconnects, 1);
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_times_out() {
        let device = ScriptedDevice {
            hang_connect: true,
            ..Default::default()
        };
        let mut link = SensorLink::new(device, &config());
        let (_tx, mut rx) = watch::channel(false);
        let mut handler = Collect::default();

        let started = Instant::now();
        let err = link.run(&mut rx, &mut handler).await.unwrap_err();

        assert!(matches!(err, LinkError::ConnectTimeout(_)));
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(link.device().disconnects, 1);
        assert!(!link.device().scanning);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_connecting() {
        let device = ScriptedDevice {
            hang_connect: true,
            ..Default::default()
        };
        let mut link = SensorLink::new(device, &config());
        let (tx, mut rx) = watch::channel(false);
        let mut handler = Collect::default();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            tx.send(true).unwrap();
        });

        let end = link.run(&mut rx, &mut handler).await.unwrap();
        assert_eq!(end, SessionEnd::Shutdown);
        assert_eq!(link.device().disconnects, 1);
        assert!(!link.device().scanning);
    }

    #[tokio::test(start_paused = true)]
    async fn link_state_query_errors_do_not_end_session() {
        let device = ScriptedDevice {
            failed_link_queries: 3,
            ..ScriptedDevice::with_reads(vec![Ok(GOOD.to_vec()); 4])
        };
        let mut link = SensorLink::new(device, &config());
        let (_tx, mut rx) = watch::channel(false);
        let mut handler = Collect::default();

        let end = link.run(&mut rx, &mut handler).await.unwrap();

        assert_eq!(end, SessionEnd::Dropped);
        assert_eq!(handler.readings.len(), 4);
        assert!(handler.errors.is_empty());
        assert_eq!(link.device().connects, 1);
    }

    #[test]
    fn ble_device_targets_configured_address() {
        let config = config();
        assert_eq!(config.ble_device().address(), config.address);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_error_is_reported_not_returned() {
        let device = ScriptedDevice {
            fail_disconnect: true,
            ..ScriptedDevice::with_reads(vec![Ok(GOOD.to_vec())])
        };
        let mut link = SensorLink::new(device, &config());
        let (_tx, mut rx) = watch::channel(false);
        let mut handler = Collect::default();

        let end = link.run(&mut rx, &mut handler).await.unwrap();

        assert_eq!(end, SessionEnd::Dropped);
        assert_eq!(handler.errors, vec![ErrorKind::Disconnect]);
        assert_eq!(link.device().disconnects, 1);
    }
}
