//! The scheduler loop: pulls ready queues, dispatches bounded worker
//! tasks, and emits fetch results until every queue has drained.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::datum::{FetchStatus, Metadata, StatusDatum, UrlStatus};
use crate::fetcher::Fetcher;
use crate::metrics::FetchMetrics;
use crate::queue_manager::QueueManager;
use crate::sink::OutputSink;
use crate::host_queue::HostQueue;

/// Emits a FetchError status and releases the queue slot if a worker dies
/// before finishing its URL. On the normal path the worker marks the guard
/// complete and only the release runs.
struct WorkerGuard {
    queues: Arc<QueueManager>,
    queue: Arc<HostQueue>,
    url: String,
    metadata: Metadata,
    sink: OutputSink,
    metrics: Arc<FetchMetrics>,
    completed: AtomicBool,
}

impl WorkerGuard {
    fn new(
        queues: Arc<QueueManager>,
        queue: Arc<HostQueue>,
        url: String,
        metadata: Metadata,
        sink: OutputSink,
        metrics: Arc<FetchMetrics>,
    ) -> Self {
        Self {
            queues,
            queue,
            url,
            metadata,
            sink,
            metrics,
            completed: AtomicBool::new(false),
        }
    }

    fn complete(&self) {
        self.completed.store(true, Ordering::Relaxed);
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if !self.completed.load(Ordering::Relaxed) {
            tracing::error!(url = %self.url, "fetch worker died mid-flight");
            self.metrics.record_status(UrlStatus::FetchError);
            self.sink.status(StatusDatum::new(
                self.url.clone(),
                UrlStatus::FetchError,
                0,
                Some("fetch worker terminated unexpectedly".to_string()),
                std::mem::take(&mut self.metadata),
            ));
        }
        self.queues.release(&self.queue);
    }
}

/// Drives fetching until the queue manager reports done.
///
/// One driver task; worker tasks bounded by the fetcher's `max_threads`.
/// Past the crawl deadline no new URLs dispatch (queues drain themselves
/// to Aborted on their next poll) while in-flight workers finish
/// naturally.
pub struct FetcherManager {
    queues: Arc<QueueManager>,
    fetcher: Arc<dyn Fetcher>,
    sink: OutputSink,
    metrics: Arc<FetchMetrics>,
}

impl FetcherManager {
    pub fn new(
        queues: Arc<QueueManager>,
        fetcher: Arc<dyn Fetcher>,
        sink: OutputSink,
        metrics: Arc<FetchMetrics>,
    ) -> Self {
        Self {
            queues,
            fetcher,
            sink,
            metrics,
        }
    }

    #[tracing::instrument(skip(self), fields(max_threads = self.fetcher.max_threads()))]
    pub async fn run(&self) {
        let permits = Arc::new(Semaphore::new(self.fetcher.max_threads()));
        let mut workers: JoinSet<()> = JoinSet::new();
        let take_timeout = Duration::from_millis(Config::TAKE_READY_TIMEOUT_MS);

        tracing::info!(queues = self.queues.len(), "fetch loop starting");

        loop {
            // Reap finished workers without blocking the dispatch path.
            while let Some(result) = workers.try_join_next() {
                if let Err(e) = result {
                    if e.is_panic() {
                        tracing::error!("fetch worker panicked: {:?}", e);
                    }
                }
            }

            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let queue = match self.queues.take_ready(take_timeout).await {
                Some(queue) => queue,
                None => {
                    drop(permit);
                    while workers.try_join_next().is_some() {}
                    if workers.is_empty() && self.queues.is_done() {
                        break;
                    }
                    continue;
                }
            };

            // Readiness can go stale between take_ready and poll; an empty
            // hand is fine, the loop just comes back around.
            let scored = match queue.poll() {
                Some(scored) => scored,
                None => {
                    drop(permit);
                    continue;
                }
            };

            let fetcher = Arc::clone(&self.fetcher);
            let sink = self.sink.clone();
            let metrics = Arc::clone(&self.metrics);
            let guard = WorkerGuard::new(
                Arc::clone(&self.queues),
                Arc::clone(&queue),
                scored.url().to_string(),
                scored.datum.metadata.clone(),
                sink.clone(),
                Arc::clone(&metrics),
            );

            workers.spawn(async move {
                let fetched = fetcher.fetch(&scored).await;
                let status = StatusDatum::from_fetched(&fetched);

                metrics.record_status(status.status);
                if fetched.status == FetchStatus::Fetched {
                    metrics.record_content_bytes(fetched.content.len());
                    sink.content(fetched);
                }
                sink.status(status);

                guard.complete();
                drop(guard);
                drop(permit);
            });
        }

        // Let stragglers finish; their queues already stopped dispatching.
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!("fetch worker panicked: {:?}", e);
                }
            }
        }

        tracing::info!(metrics = %self.metrics.snapshot(), "fetch loop finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetcherPolicy;
    use crate::datum::{ScoredUrlDatum, UrlDatum};
    use crate::grouping::GroupingKey;
    use crate::simulation::FakeFetcher;

    fn fetchable_key(domain: &str) -> GroupingKey {
        GroupingKey::Fetchable {
            domain: domain.to_string(),
            crawl_delay_ms: 0,
        }
    }

    fn populated_manager(
        domains: usize,
        urls_per_domain: usize,
        policy: Arc<FetcherPolicy>,
        sink: &OutputSink,
        metrics: &Arc<FetchMetrics>,
    ) -> Arc<QueueManager> {
        let queues = Arc::new(QueueManager::new());
        for d in 0..domains {
            let domain = format!("domain-{}.com", d);
            let queue = Arc::new(HostQueue::new(
                fetchable_key(&domain),
                Arc::clone(&policy),
                sink.clone(),
                Arc::clone(metrics),
            ));
            for p in 0..urls_per_domain {
                let scored = ScoredUrlDatum {
                    datum: UrlDatum::new(format!("http://{}/page-{}.html", domain, p)),
                    key: fetchable_key(&domain),
                    score: 1.0,
                };
                assert!(queue.offer(scored));
            }
            queues.offer(queue);
        }
        queues
    }

    #[tokio::test]
    async fn test_run_fetches_everything() {
        let policy = Arc::new(FetcherPolicy::new());
        let (sink, content_rx, status_rx) = OutputSink::channels();
        let metrics = Arc::new(FetchMetrics::new());
        let queues = populated_manager(5, 3, policy, &sink, &metrics);

        let fetcher = Arc::new(FakeFetcher::new(4).with_latency(Duration::from_millis(2)));
        let manager = FetcherManager::new(queues, fetcher, sink, Arc::clone(&metrics));
        manager.run().await;

        assert_eq!(content_rx.len(), 15);
        assert_eq!(status_rx.len(), 15);
        assert_eq!(metrics.snapshot().fetched, 15);
    }

    #[tokio::test]
    async fn test_run_respects_deadline() {
        let policy = Arc::new(
            FetcherPolicy::new().with_crawl_end_time(crate::datum::now_millis() - 1000),
        );
        let (sink, content_rx, status_rx) = OutputSink::channels();
        let metrics = Arc::new(FetchMetrics::new());
        let queues = populated_manager(1, 10, policy, &sink, &metrics);

        let fetcher = Arc::new(FakeFetcher::new(2).with_latency(Duration::ZERO));
        let manager = FetcherManager::new(queues, fetcher, sink, Arc::clone(&metrics));
        manager.run().await;

        assert_eq!(content_rx.len(), 0);
        let statuses: Vec<StatusDatum> = status_rx.try_iter().collect();
        assert_eq!(statuses.len(), 10);
        assert!(statuses.iter().all(|s| s.status == UrlStatus::Aborted));
    }
}
