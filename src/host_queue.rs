//! Queue of pending URLs for one grouping key, enforcing crawl-delay
//! spacing and the per-host concurrency cap.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{Config, FetcherPolicy};
use crate::datum::{now_millis, ScoredUrlDatum, StatusDatum, UrlStatus};
use crate::disk_queue::DiskSpillQueue;
use crate::grouping::GroupingKey;
use crate::metrics::FetchMetrics;
use crate::sink::OutputSink;

/// Whether a queue could hand out a URL right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Pacing: ready again after this long.
    RateLimited(Duration),
    /// All allowed in-flight slots for this host are taken.
    AtCapacity,
    /// Nothing queued and nothing in flight.
    Empty,
}

struct QueueState {
    queue: DiskSpillQueue<ScoredUrlDatum>,
    last_dispatch: Option<Instant>,
    num_active: usize,
}

/// URLs bound for one destination at one rate.
///
/// Mutated by the driver (`poll`) and by workers (`release`), so all state
/// sits behind an internal lock.
pub struct HostQueue {
    key: GroupingKey,
    crawl_delay: Duration,
    policy: Arc<FetcherPolicy>,
    sink: OutputSink,
    metrics: Arc<FetchMetrics>,
    state: Mutex<QueueState>,
}

impl HostQueue {
    pub fn new(
        key: GroupingKey,
        policy: Arc<FetcherPolicy>,
        sink: OutputSink,
        metrics: Arc<FetchMetrics>,
    ) -> Self {
        let crawl_delay = key
            .crawl_delay()
            .unwrap_or_else(|| Duration::from_millis(policy.default_crawl_delay()));

        Self {
            key,
            crawl_delay,
            policy,
            sink,
            metrics,
            state: Mutex::new(QueueState {
                queue: DiskSpillQueue::new(Config::HOST_QUEUE_MEMORY_CAP),
                last_dispatch: None,
                num_active: 0,
            }),
        }
    }

    pub fn key(&self) -> &GroupingKey {
        &self.key
    }

    pub fn crawl_delay(&self) -> Duration {
        self.crawl_delay
    }

    /// Enqueue a URL. Returns false when the queue cannot take it, in
    /// which case the caller still owns the datum's status emission.
    pub fn offer(&self, scored: ScoredUrlDatum) -> bool {
        let mut state = self.state.lock();
        match state.queue.offer(scored) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(key = %self.key, error = %e, "host queue spill failed");
                false
            }
        }
    }

    /// Hand out the next URL if pacing and capacity allow.
    ///
    /// Past the crawl deadline the whole queue drains as Aborted status
    /// records and `poll` returns None.
    pub fn poll(&self) -> Option<ScoredUrlDatum> {
        let mut state = self.state.lock();

        if now_millis() > self.policy.crawl_end_time() {
            self.drain_aborted(&mut state);
            return None;
        }

        if state.num_active >= self.policy.threads_per_host() {
            return None;
        }

        if let Some(last) = state.last_dispatch {
            if last.elapsed() < self.crawl_delay {
                return None;
            }
        }

        match state.queue.poll() {
            Ok(Some(scored)) => {
                state.num_active += 1;
                state.last_dispatch = Some(Instant::now());
                Some(scored)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::error!(key = %self.key, error = %e, "host queue read failed");
                None
            }
        }
    }

    /// Mark one in-flight request as finished. Called by the worker after
    /// it has emitted the fetch result.
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.num_active = state.num_active.saturating_sub(1);
    }

    /// Drained and idle.
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.queue.is_empty() && state.num_active == 0
    }

    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Dispatch readiness at this instant.
    pub fn readiness(&self) -> Readiness {
        let state = self.state.lock();

        if state.queue.is_empty() {
            if state.num_active == 0 {
                return Readiness::Empty;
            }
            return Readiness::AtCapacity;
        }

        // Expired queues are "ready": the next poll drains them.
        if now_millis() > self.policy.crawl_end_time() {
            return Readiness::Ready;
        }

        if state.num_active >= self.policy.threads_per_host() {
            return Readiness::AtCapacity;
        }

        if let Some(last) = state.last_dispatch {
            let since = last.elapsed();
            if since < self.crawl_delay {
                return Readiness::RateLimited(self.crawl_delay - since);
            }
        }

        Readiness::Ready
    }

    fn drain_aborted(&self, state: &mut QueueState) {
        loop {
            match state.queue.poll() {
                Ok(Some(scored)) => {
                    tracing::debug!(url = %scored.datum.url, "crawl deadline passed, aborting");
                    self.metrics.record_status(UrlStatus::Aborted);
                    self.sink.status(StatusDatum::new(
                        scored.datum.url,
                        UrlStatus::Aborted,
                        0,
                        None,
                        scored.datum.metadata,
                    ));
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(key = %self.key, error = %e, "drain failed");
                    break;
                }
            }
        }
    }
}
