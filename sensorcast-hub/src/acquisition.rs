//! Acquisition task: drives the sensor link and broadcasts every reading

use std::sync::Arc;
use std::time::Duration;

use sensorcast_link::{
    ErrorKind, LinkError, LinkHandler, SensorDevice, SensorLink, SessionEnd, wait_for_shutdown,
};
use sensorcast_proto::{Event, Reading};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::registry::Registry;

/// What to do after a session ends without a shutdown request.
///
/// The default makes no further attempt: one failed connect or one lost
/// link stops acquisition until the process restarts.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0 based): `base * 2^attempt`, capped
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stopped on request
    Shutdown,
    /// The last session could not connect
    ConnectFailed,
    /// The last session lost its link
    Dropped,
}

/// Counters for the whole lifetime of the task
#[derive(Debug, Clone)]
pub struct AcquisitionReport {
    pub sessions: u32,
    pub readings: u64,
    pub read_errors: u64,
    pub decode_errors: u64,
    pub outcome: Outcome,
}

/// Feeds link results into the registry and keeps count
struct Broadcaster {
    registry: Arc<Registry>,
    readings: u64,
    read_errors: u64,
    decode_errors: u64,
}

impl LinkHandler for Broadcaster {
    async fn on_reading(&mut self, reading: Reading) {
        self.readings += 1;
        self.registry.broadcast(&Event::SensorData(reading)).await;
    }

    fn on_error(&mut self, error: &LinkError) {
        match error.kind() {
            ErrorKind::Read => self.read_errors += 1,
            ErrorKind::Decode => self.decode_errors += 1,
            // connect failures come back from `run`, disconnect ones are only logged
            ErrorKind::Connect | ErrorKind::Disconnect => {}
        }
    }
}

/// Handle to the running acquisition task
pub struct AcquisitionHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<AcquisitionReport>,
}

impl AcquisitionHandle {
    /// Ask the task to stop. It disconnects from the sensor before exiting.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<AcquisitionReport, tokio::task::JoinError> {
        self.task.await
    }
}

/// Start acquiring in the background. Readings are broadcast whether or not
/// anyone is subscribed.
pub fn spawn<D>(
    link: SensorLink<D>,
    registry: Arc<Registry>,
    policy: ReconnectPolicy,
) -> AcquisitionHandle
where
    D: SensorDevice + 'static,
{
    let (shutdown, rx) = watch::channel(false);
    let task = tokio::spawn(run(link, registry, policy, rx));
    AcquisitionHandle { shutdown, task }
}

async fn run<D: SensorDevice>(
    mut link: SensorLink<D>,
    registry: Arc<Registry>,
    policy: ReconnectPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> AcquisitionReport {
    let mut handler = Broadcaster {
        registry,
        readings: 0,
        read_errors: 0,
        decode_errors: 0,
    };
    let mut sessions = 0;
    let mut attempt = 0;

    let outcome = loop {
        sessions += 1;
        let before = handler.readings;

        let outcome = match link.run(&mut shutdown, &mut handler).await {
            Ok(SessionEnd::Shutdown) => break Outcome::Shutdown,
            Ok(SessionEnd::Dropped) => Outcome::Dropped,
            Err(_) => Outcome::ConnectFailed,
        };

        // a session that produced data starts the backoff over
        if handler.readings > before {
            attempt = 0;
        }
        if attempt >= policy.max_attempts {
            break outcome;
        }

        let delay = policy.delay(attempt);
        attempt += 1;
        warn!(
            "session ended ({outcome:?}), reconnecting in {delay:?} ({attempt}/{})",
            policy.max_attempts
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wait_for_shutdown(&mut shutdown) => break Outcome::Shutdown,
        }
    };

    let report = AcquisitionReport {
        sessions,
        readings: handler.readings,
        read_errors: handler.read_errors,
        decode_errors: handler.decode_errors,
        outcome,
    };
    info!("acquisition stopped: {report:?}");
    report
}
