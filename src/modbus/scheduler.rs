//! Interval-driven polling of a [`DataChannel`]
//!
//! The scheduler owns one background task per polling period. Stopping it
//! cancels the task's token; a fetch that is already in flight runs to
//! completion on its own task and still updates the channel. At most one
//! scheduled fetch is outstanding at any time: a tick that finds the previous
//! fetch unresolved is skipped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{DataChannel, DataDomain};
use crate::metrics;

struct PollTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives one channel on a fixed interval
pub struct PollingScheduler<D: DataDomain> {
    channel: Arc<DataChannel<D>>,
    period: Duration,
    task: Mutex<Option<PollTask>>,
}

impl<D: DataDomain> PollingScheduler<D> {
    pub fn new(channel: Arc<DataChannel<D>>, period: Duration) -> Self {
        Self {
            channel,
            period,
            task: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> &Arc<DataChannel<D>> {
        &self.channel
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    fn task(&self) -> MutexGuard<'_, Option<PollTask>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_polling(&self) -> bool {
        self.task()
            .as_ref()
            .is_some_and(|task| !task.token.is_cancelled() && !task.handle.is_finished())
    }

    /// Start polling: one fetch right away, then one per period.
    ///
    /// Returns `false` if the scheduler was already polling.
    pub async fn start(&self) -> bool {
        {
            let mut task = self.task();
            if task
                .as_ref()
                .is_some_and(|t| !t.token.is_cancelled() && !t.handle.is_finished())
            {
                return false;
            }

            let token = CancellationToken::new();
            let handle = tokio::spawn(run(self.channel.clone(), self.period, token.clone()));
            *task = Some(PollTask { token, handle });
        }

        info!(
            "{}: auto-refresh started every {}ms",
            D::DOMAIN,
            self.period().as_millis()
        );
        self.channel.set_auto_refresh(true).await;
        metrics::record_polling_enabled(D::DOMAIN, true);
        true
    }

    /// Stop scheduling further fetches.
    ///
    /// Returns `false` if the scheduler was not polling.
    pub async fn stop(&self) -> bool {
        let stopped = match self.task().take() {
            Some(task) => {
                let was_polling = !task.token.is_cancelled();
                task.token.cancel();
                was_polling
            }
            None => false,
        };

        if stopped {
            info!("{}: auto-refresh stopped", D::DOMAIN);
        }
        self.channel.set_auto_refresh(false).await;
        metrics::record_polling_enabled(D::DOMAIN, false);
        stopped
    }

    /// Flip auto-refresh and return the new state
    pub async fn toggle(&self) -> bool {
        if self.is_polling() {
            self.stop().await;
            false
        } else {
            self.start().await;
            true
        }
    }
}

impl<D: DataDomain> Drop for PollingScheduler<D> {
    fn drop(&mut self) {
        if let Some(task) = self.task().take() {
            task.token.cancel();
        }
    }
}

async fn run<D: DataDomain>(
    channel: Arc<DataChannel<D>>,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if in_flight.as_ref().is_some_and(|fetch| !fetch.is_finished()) {
                    debug!("{}: previous fetch still in flight, skipping tick", D::DOMAIN);
                    metrics::record_skipped_tick(D::DOMAIN, "in_flight");
                    continue;
                }

                let channel = channel.clone();
                in_flight = Some(tokio::spawn(async move {
                    // Failures are recorded on the channel; the next tick retries.
                    if let Err(e) = channel.fetch_current().await {
                        if !e.is_transient() {
                            debug!("{}: range rejected, skipping tick", D::DOMAIN);
                            metrics::record_skipped_tick(D::DOMAIN, "invalid_range");
                        }
                    }
                }));
            }
        }
    }

    debug!("{}: poll task exited", D::DOMAIN);
}
