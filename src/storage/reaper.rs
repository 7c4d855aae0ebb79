//! Background eviction of expired entries
//!
//! The reaper is a tokio task owned by one storage instance. Every tick it
//! walks the stripes one at a time: snapshot due keys under the read lock,
//! then delete them under the write lock after re-checking their deadline.

use super::striped::StripedMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Default sweep period
pub const REAPER_INTERVAL: Duration = Duration::from_secs(1);

/// Handle on a running reaper task
pub struct Reaper {
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Reaper {
    /// Start sweeping `map` every `period`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(map: Arc<StripedMap>, period: Duration) -> Self {
        Self::spawn_with(period, move || {
            let removed = sweep(&map, Instant::now());
            async move { removed }
        })
    }

    /// Run `pass` every `period` until stopped
    ///
    /// `pass` resolves to the number of evicted entries. A pass in progress
    /// always completes before the task exits.
    pub fn spawn_with<F, Fut>(period: Duration, mut pass: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = usize> + Send + 'static,
    {
        let token = CancellationToken::new();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!("Reaper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = pass().await;
                        if removed > 0 {
                            debug!("Reaper evicted {} expired entries", removed);
                        } else {
                            trace!("Reaper sweep found nothing to evict");
                        }
                    }
                }
            }
        });

        Reaper {
            token,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop the task and wait for it to finish. Calling this again is a no-op.
    pub async fn stop(&self) {
        self.token.cancel();

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Reaper task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// One pass over every stripe, returns the number of evicted entries
pub fn sweep(map: &StripedMap, now: Instant) -> usize {
    (0..map.num_stripes())
        .map(|idx| {
            let due = map.collect_due(idx, now);
            map.remove_due(idx, &due, now)
        })
        .sum()
}
