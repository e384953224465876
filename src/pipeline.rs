//! The fetch stage end to end: group, score, enqueue, fetch.
//!
//! Every input URL leaves as exactly one status record. URLs with sentinel
//! grouping keys or skip scores never reach a queue; everything else is
//! grouped per key, ordered by descending score, and drained through the
//! fetcher manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::FetcherPolicy;
use crate::datum::{GroupedUrlDatum, ScoredUrlDatum, StatusDatum, UrlDatum, UrlStatus};
use crate::fetcher::Fetcher;
use crate::grouping::{GroupingKey, GroupingKeyGenerator};
use crate::host_queue::HostQueue;
use crate::manager::FetcherManager;
use crate::metrics::{FetchMetrics, MetricsSnapshot};
use crate::queue_manager::QueueManager;
use crate::scoring::ScoreGenerator;
use crate::sink::OutputSink;

/// Configuration and collaborators for one fetch run.
pub struct FetchPipe {
    fetcher: Arc<dyn Fetcher>,
    robots_fetcher: Arc<dyn Fetcher>,
    scorer: Arc<dyn ScoreGenerator>,
    policy: Arc<FetcherPolicy>,
    user_agent: String,
    group_by_ip: bool,
    sink: OutputSink,
    metrics: Arc<FetchMetrics>,
}

impl FetchPipe {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        robots_fetcher: Arc<dyn Fetcher>,
        scorer: Arc<dyn ScoreGenerator>,
        sink: OutputSink,
    ) -> Self {
        let policy = Arc::new(fetcher.policy().clone());
        let user_agent = fetcher.user_agent().to_string();
        Self {
            fetcher,
            robots_fetcher,
            scorer,
            policy,
            user_agent,
            group_by_ip: false,
            sink,
            metrics: Arc::new(FetchMetrics::new()),
        }
    }

    /// Group by resolved IP address instead of paid-level domain.
    pub fn with_group_by_ip(mut self, group_by_ip: bool) -> Self {
        self.group_by_ip = group_by_ip;
        self
    }

    pub fn metrics(&self) -> Arc<FetchMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run the stage over `input` to completion.
    pub async fn run(&self, input: Vec<UrlDatum>) -> MetricsSnapshot {
        let total = input.len();
        tracing::info!(urls = total, "fetch stage starting");

        let scored_groups = self.group_and_score(input).await;

        let queues = Arc::new(QueueManager::new());
        for (key, mut group) in scored_groups {
            // Queues consume per-host URLs best-first.
            group.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let queue = Arc::new(HostQueue::new(
                key,
                Arc::clone(&self.policy),
                self.sink.clone(),
                Arc::clone(&self.metrics),
            ));
            for scored in group {
                if !queue.offer(scored.clone()) {
                    self.emit_status(
                        scored.datum.url,
                        UrlStatus::FetchError,
                        Some("host queue refused URL".to_string()),
                        scored.datum.metadata,
                    );
                }
            }
            queues.offer(queue);
        }

        FetcherManager::new(
            Arc::clone(&queues),
            Arc::clone(&self.fetcher),
            self.sink.clone(),
            Arc::clone(&self.metrics),
        )
        .run()
        .await;

        let snapshot = self.metrics.snapshot();
        tracing::info!(urls = total, %snapshot, "fetch stage finished");
        snapshot
    }

    /// Classify and score the input, emitting terminal statuses for
    /// everything that will not be fetched.
    async fn group_and_score(
        &self,
        input: Vec<UrlDatum>,
    ) -> HashMap<GroupingKey, Vec<ScoredUrlDatum>> {
        let mut generator = GroupingKeyGenerator::new(
            self.user_agent.clone(),
            Arc::clone(&self.robots_fetcher),
            Duration::from_millis(self.policy.default_crawl_delay()),
            self.group_by_ip,
        );

        let mut groups: HashMap<GroupingKey, Vec<ScoredUrlDatum>> = HashMap::new();

        for datum in input {
            let key = match generator.grouping_key(&datum).await {
                Ok(key) => key,
                Err(e) => {
                    self.emit_status(
                        datum.url,
                        UrlStatus::FetchError,
                        Some(e.to_string()),
                        datum.metadata,
                    );
                    continue;
                }
            };

            if let Some(status) = key.sentinel_status() {
                self.emit_status(datum.url, status, None, datum.metadata);
                continue;
            }

            let grouped = GroupedUrlDatum::new(datum, key.clone());
            let score = self.scorer.score(&grouped);
            if score < 0.0 {
                self.emit_status(
                    grouped.datum.url,
                    UrlStatus::Skipped,
                    None,
                    grouped.datum.metadata,
                );
                continue;
            }

            groups
                .entry(key)
                .or_default()
                .push(ScoredUrlDatum::new(grouped, score));
        }

        groups
    }

    fn emit_status(
        &self,
        url: String,
        status: UrlStatus,
        error_msg: Option<String>,
        metadata: crate::datum::Metadata,
    ) {
        self.metrics.record_status(status);
        self.sink
            .status(StatusDatum::new(url, status, 0, error_msg, metadata));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::FixedScoreGenerator;
    use crate::simulation::{FakeFetcher, NullFetcher};

    #[tokio::test]
    async fn test_every_input_gets_one_status() {
        let fetcher = Arc::new(FakeFetcher::new(4).with_latency(Duration::from_millis(1)));
        let (sink, _content_rx, status_rx) = OutputSink::channels();
        let pipe = FetchPipe::new(
            fetcher,
            Arc::new(NullFetcher::new()),
            Arc::new(FixedScoreGenerator::new(1.0)),
            sink,
        );

        let input: Vec<UrlDatum> = (0..10)
            .map(|i| UrlDatum::new(format!("http://domain-{}.com/page.html", i)))
            .collect();

        pipe.run(input).await;
        assert_eq!(status_rx.len(), 10);
    }

    #[tokio::test]
    async fn test_malformed_url_surfaces_as_fetch_error() {
        let fetcher = Arc::new(FakeFetcher::new(1).with_latency(Duration::ZERO));
        let (sink, _content_rx, status_rx) = OutputSink::channels();
        let pipe = FetchPipe::new(
            fetcher,
            Arc::new(NullFetcher::new()),
            Arc::new(FixedScoreGenerator::new(1.0)),
            sink,
        );

        pipe.run(vec![UrlDatum::new("definitely not a url")]).await;

        let statuses: Vec<StatusDatum> = status_rx.try_iter().collect();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, UrlStatus::FetchError);
        assert!(statuses[0].error_msg.is_some());
    }
}
