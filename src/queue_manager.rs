//! Ordered collection of host queues with fair ready-queue selection.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::grouping::GroupingKey;
use crate::host_queue::{HostQueue, Readiness};

/// Registry plus round-robin rotation over host queues.
///
/// `take_ready` hands the driver a queue whose `poll` would succeed right
/// now, sleeping until the earliest pacing deadline otherwise. Workers
/// finishing a URL go through [`QueueManager::release`], which wakes the
/// driver instead of leaving it to spin.
pub struct QueueManager {
    registry: DashMap<GroupingKey, Arc<HostQueue>>,
    rotation: Mutex<VecDeque<Arc<HostQueue>>>,
    released: Notify,
}

impl QueueManager {
    pub fn new() -> Self {
        Self {
            registry: DashMap::new(),
            rotation: Mutex::new(VecDeque::new()),
            released: Notify::new(),
        }
    }

    /// Register a queue. Returns false when its key is already tracked.
    pub fn offer(&self, queue: Arc<HostQueue>) -> bool {
        let key = queue.key().clone();
        if self.registry.contains_key(&key) {
            return false;
        }

        self.registry.insert(key, queue.clone());
        self.rotation.lock().push_back(queue);
        self.released.notify_waiters();
        true
    }

    pub fn get(&self, key: &GroupingKey) -> Option<Arc<HostQueue>> {
        self.registry.get(key).map(|entry| entry.value().clone())
    }

    /// Mark one worker slot on `queue` as finished and wake the driver.
    pub fn release(&self, queue: &HostQueue) {
        queue.release();
        self.released.notify_waiters();
    }

    /// Next queue whose `poll` would succeed, waiting up to `timeout` for
    /// one to become ready. Exhausted queues are dropped from the rotation
    /// along the way.
    pub async fn take_ready(&self, timeout: Duration) -> Option<Arc<HostQueue>> {
        let deadline = Instant::now() + timeout;

        loop {
            let (ready, min_wait) = self.scan();
            if ready.is_some() {
                return ready;
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }

            let mut wait = deadline - now;
            if let Some(pacing) = min_wait {
                wait = wait.min(pacing);
            }

            tokio::select! {
                _ = self.released.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// One full pass over the rotation. Ready queues rotate to the back so
    /// no queue starves while others keep qualifying.
    fn scan(&self) -> (Option<Arc<HostQueue>>, Option<Duration>) {
        let mut rotation = self.rotation.lock();
        let mut min_wait: Option<Duration> = None;

        for _ in 0..rotation.len() {
            let queue = match rotation.pop_front() {
                Some(queue) => queue,
                None => break,
            };

            match queue.readiness() {
                Readiness::Ready => {
                    rotation.push_back(queue.clone());
                    return (Some(queue), min_wait);
                }
                Readiness::RateLimited(wait) => {
                    min_wait = Some(min_wait.map_or(wait, |w| w.min(wait)));
                    rotation.push_back(queue);
                }
                Readiness::AtCapacity => {
                    rotation.push_back(queue);
                }
                Readiness::Empty => {
                    self.registry.remove(queue.key());
                }
            }
        }

        (None, min_wait)
    }

    /// True when every tracked queue has drained and gone idle.
    pub fn is_done(&self) -> bool {
        self.rotation.lock().iter().all(|queue| queue.is_empty())
    }

    /// Queues still tracked in the rotation.
    pub fn len(&self) -> usize {
        self.rotation.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// URLs still queued across all hosts.
    pub fn pending_urls(&self) -> usize {
        self.rotation.lock().iter().map(|queue| queue.pending()).sum()
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetcherPolicy;
    use crate::datum::{ScoredUrlDatum, UrlDatum};
    use crate::metrics::FetchMetrics;
    use crate::sink::OutputSink;

    fn fetchable_key(domain: &str, delay_ms: u64) -> GroupingKey {
        GroupingKey::Fetchable {
            domain: domain.to_string(),
            crawl_delay_ms: delay_ms,
        }
    }

    fn queue(domain: &str, delay_ms: u64) -> Arc<HostQueue> {
        Arc::new(HostQueue::new(
            fetchable_key(domain, delay_ms),
            Arc::new(FetcherPolicy::new()),
            OutputSink::disabled(),
            Arc::new(FetchMetrics::new()),
        ))
    }

    fn scored(domain: &str, path: &str, delay_ms: u64) -> ScoredUrlDatum {
        ScoredUrlDatum {
            datum: UrlDatum::new(format!("http://{}/{}", domain, path)),
            key: fetchable_key(domain, delay_ms),
            score: 1.0,
        }
    }

    #[test]
    fn test_offer_rejects_duplicate_key() {
        let manager = QueueManager::new();
        assert!(manager.offer(queue("a.local", 0)));
        assert!(!manager.offer(queue("a.local", 0)));
        assert!(manager.offer(queue("b.local", 0)));
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test]
    async fn test_take_ready_returns_ready_queue() {
        let manager = QueueManager::new();
        let q = queue("a.local", 0);
        assert!(q.offer(scored("a.local", "x", 0)));
        manager.offer(q);

        let ready = manager.take_ready(Duration::from_millis(50)).await;
        assert!(ready.is_some());
    }

    #[tokio::test]
    async fn test_take_ready_times_out_when_nothing_queued() {
        let manager = QueueManager::new();
        let ready = manager.take_ready(Duration::from_millis(20)).await;
        assert!(ready.is_none());
    }

    #[tokio::test]
    async fn test_take_ready_skips_rate_limited_queue() {
        let manager = QueueManager::new();
        let q = queue("a.local", 60_000);
        assert!(q.offer(scored("a.local", "x", 60_000)));
        assert!(q.offer(scored("a.local", "y", 60_000)));
        manager.offer(q.clone());

        // First URL dispatches, then the queue is pacing-blocked.
        let first = manager.take_ready(Duration::from_millis(50)).await;
        assert!(first.is_some());
        assert!(first.and_then(|queue| queue.poll()).is_some());
        manager.release(&q);

        let second = manager.take_ready(Duration::from_millis(30)).await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_round_robin_rotates_ready_queues() {
        let manager = QueueManager::new();
        for domain in ["a.local", "b.local", "c.local"] {
            let q = queue(domain, 0);
            assert!(q.offer(scored(domain, "x", 0)));
            assert!(q.offer(scored(domain, "y", 0)));
            manager.offer(q);
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            let q = manager
                .take_ready(Duration::from_millis(50))
                .await
                .expect("queue ready");
            seen.push(q.key().to_string());
        }

        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 3, "all queues should get a turn: {:?}", seen);
    }

    #[tokio::test]
    async fn test_empty_queues_retired() {
        let manager = QueueManager::new();
        let q = queue("a.local", 0);
        assert!(q.offer(scored("a.local", "x", 0)));
        manager.offer(q.clone());

        let taken = manager.take_ready(Duration::from_millis(50)).await;
        let scored_url = taken.and_then(|queue| queue.poll());
        assert!(scored_url.is_some());
        manager.release(&q);

        // Drained and idle: the next scan retires it.
        let _ = manager.take_ready(Duration::from_millis(20)).await;
        assert!(manager.is_done());
        assert_eq!(manager.len(), 0);
    }
}
