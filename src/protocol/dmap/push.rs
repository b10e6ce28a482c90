//! DMAP push updates via `playstatusupdate` long-polling

use super::protocol::DmapClient;
use crate::state::{DeviceEvent, PlayStatusDedup, StateProducer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Long-poll timeout: the server blocks until its revision changes.
const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(180);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Long-poll driver emitting deduplicated play status events.
pub struct DmapPushUpdater {
    client: Arc<Mutex<DmapClient>>,
    producer: Arc<StateProducer>,
    active: Arc<AtomicBool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DmapPushUpdater {
    /// Create an updater with its own client connection.
    #[must_use]
    pub fn new(client: DmapClient, producer: Arc<StateProducer>) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
            producer,
            active: Arc::new(AtomicBool::new(false)),
            task: std::sync::Mutex::new(None),
        }
    }

    /// True while the poll loop runs.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start the revision loop.
    ///
    /// On error the revision resets to zero and polling resumes after
    /// an exponential backoff seeded by `initial_delay`.
    pub fn start(&self, initial_delay: Option<Duration>) {
        if self.active.swap(true, Ordering::SeqCst) {
            return;
        }

        let client = self.client.clone();
        let producer = self.producer.clone();
        let active = self.active.clone();
        let seed = initial_delay.unwrap_or(Duration::from_secs(1));

        let handle = tokio::spawn(async move {
            let dedup = PlayStatusDedup::new();
            let mut revision: u32 = 0;
            let mut failures: u32 = 0;

            while active.load(Ordering::SeqCst) {
                let result = client
                    .lock()
                    .await
                    .play_status(revision, LONG_POLL_TIMEOUT)
                    .await;

                match result {
                    Ok((playing, new_revision)) => {
                        failures = 0;
                        revision = new_revision.wrapping_add(1);
                        if dedup.accept(&playing) {
                            producer.emit(&DeviceEvent::PlayStatusUpdate(playing));
                        }
                    }
                    Err(err) => {
                        if !active.load(Ordering::SeqCst) {
                            break;
                        }
                        debug!("play status poll failed: {err}");
                        producer.emit(&DeviceEvent::PlayStatusError(err.to_string()));
                        revision = 0;
                        let backoff = seed
                            .saturating_mul(2u32.saturating_pow(failures))
                            .min(MAX_BACKOFF);
                        failures = failures.saturating_add(1);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        });

        *self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);
    }

    /// Stop the loop and abort the poll in flight.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for DmapPushUpdater {
    fn drop(&mut self) {
        self.stop();
    }
}
