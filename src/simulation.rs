//! Fetchers that simulate network behavior for tests and dry runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use url::Url;

use crate::config::FetcherPolicy;
use crate::datum::{now_millis, FetchStatus, FetchedDatum, HttpHeaders, Metadata, ScoredUrlDatum};
use crate::fetcher::{FetchError, Fetcher, RateMonitor};

/// Simulates successful fetches with configurable latency and streaming
/// rate. Honors the same size-cap and rate-floor rules as the real engine,
/// so slow-peer and truncation behavior can be exercised without sockets.
///
/// URLs may carry a `size=N` query parameter to control the simulated body
/// length.
pub struct FakeFetcher {
    max_threads: usize,
    policy: FetcherPolicy,
    user_agent: String,
    latency: Duration,
    page_size: usize,
    chunk_size: usize,
    chunk_delay: Duration,
}

impl FakeFetcher {
    pub fn new(max_threads: usize) -> Self {
        Self {
            max_threads: max_threads.max(1),
            policy: FetcherPolicy::new(),
            user_agent: "fake-fetcher/1.0".to_string(),
            latency: Duration::from_millis(10),
            page_size: 1024,
            chunk_size: 1024,
            chunk_delay: Duration::ZERO,
        }
    }

    pub fn with_policy(mut self, policy: FetcherPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    /// Deliver the body in `chunk_size` pieces with `chunk_delay` between
    /// them, simulating a peer with a bounded send rate.
    pub fn with_stream(mut self, chunk_size: usize, chunk_delay: Duration) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.chunk_delay = chunk_delay;
        self
    }

    fn body_length(&self, url: &Url) -> usize {
        url.query_pairs()
            .find(|(name, _)| name == "size")
            .and_then(|(_, value)| value.parse().ok())
            .unwrap_or(self.page_size)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    fn max_threads(&self) -> usize {
        self.max_threads
    }

    fn policy(&self) -> &FetcherPolicy {
        &self.policy
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }

    async fn fetch(&self, scored: &ScoredUrlDatum) -> FetchedDatum {
        let url_str = scored.url();
        let metadata = &scored.datum.metadata;

        let url = match Url::parse(url_str) {
            Ok(url) => url,
            Err(e) => {
                return FetchedDatum::error(
                    url_str,
                    format!("unable to parse URL: {}", e),
                    metadata.clone(),
                )
            }
        };

        tokio::time::sleep(self.latency).await;

        let body_length = self.body_length(&url);
        let mut truncated = false;
        let target_length = if body_length > self.policy.max_content_size() {
            truncated = true;
            self.policy.max_content_size()
        } else {
            body_length
        };

        let mut headers = HttpHeaders::new();
        headers.add("Content-Type", "text/html; charset=utf-8");
        headers.add("Content-Length", body_length.to_string());

        let mut status = FetchStatus::Fetched;
        let mut monitor = RateMonitor::new(self.policy.min_response_rate());
        let mut content = Vec::with_capacity(target_length);
        let start = Instant::now();

        let pattern = format!("fake content for {}\n", url_str).into_bytes();
        while content.len() < target_length {
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }

            let take = self.chunk_size.min(target_length - content.len());
            for _ in 0..take {
                content.push(pattern[content.len() % pattern.len()]);
            }

            let elapsed_ms = start.elapsed().as_millis() as u64;
            if monitor.observe(content.len(), elapsed_ms, target_length) {
                status = FetchStatus::Aborted;
                break;
            }
        }

        FetchedDatum {
            url: url_str.to_string(),
            redirected_url: url_str.to_string(),
            status,
            http_status: 200,
            headers,
            content,
            content_type: Some("text/html; charset=utf-8".to_string()),
            read_rate: monitor.rate(),
            fetch_time: now_millis(),
            truncated,
            error_msg: None,
            metadata: metadata.clone(),
        }
    }

    async fn get_bytes(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Http { status: 404 })
    }
}

/// Never fetches anything. As a robots fetcher it answers 404, which reads
/// as "no restrictions" for every host.
pub struct NullFetcher {
    policy: FetcherPolicy,
    user_agent: String,
}

impl NullFetcher {
    pub fn new() -> Self {
        Self {
            policy: FetcherPolicy::new(),
            user_agent: "null-fetcher/1.0".to_string(),
        }
    }
}

impl Default for NullFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for NullFetcher {
    fn max_threads(&self) -> usize {
        1
    }

    fn policy(&self) -> &FetcherPolicy {
        &self.policy
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }

    async fn fetch(&self, scored: &ScoredUrlDatum) -> FetchedDatum {
        FetchedDatum::error(
            scored.url(),
            "null fetcher never fetches",
            scored.datum.metadata.clone(),
        )
    }

    async fn get_bytes(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Http { status: 404 })
    }
}

/// Serves pre-registered bodies by exact URL, 404 for anything else.
/// Used to script robots.txt responses in tests.
pub struct StaticFetcher {
    pages: HashMap<String, Vec<u8>>,
    policy: FetcherPolicy,
    user_agent: String,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            policy: FetcherPolicy::new(),
            user_agent: "static-fetcher/1.0".to_string(),
        }
    }

    pub fn with_page(mut self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.pages.insert(url.into(), body.into());
        self
    }
}

impl Default for StaticFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    fn max_threads(&self) -> usize {
        1
    }

    fn policy(&self) -> &FetcherPolicy {
        &self.policy
    }

    fn user_agent(&self) -> &str {
        &self.user_agent
    }

    async fn fetch(&self, scored: &ScoredUrlDatum) -> FetchedDatum {
        let url = scored.url();
        match self.pages.get(url) {
            Some(body) => FetchedDatum {
                url: url.to_string(),
                redirected_url: url.to_string(),
                status: FetchStatus::Fetched,
                http_status: 200,
                headers: HttpHeaders::new(),
                content: body.clone(),
                content_type: None,
                read_rate: 0,
                fetch_time: now_millis(),
                truncated: false,
                error_msg: None,
                metadata: scored.datum.metadata.clone(),
            },
            None => {
                let mut datum = FetchedDatum::error(url, "not found", Metadata::new());
                datum.http_status = 404;
                datum
            }
        }
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        match self.pages.get(url) {
            Some(body) => Ok(body.clone()),
            None => Err(FetchError::Http { status: 404 }),
        }
    }
}
