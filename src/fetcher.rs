//! The HTTP fetch engine: a pooled, retrying, rate-monitored GET client.
//!
//! `fetch` never fails by returning an error. Transport problems, bad
//! status codes, slow peers, and oversized bodies are all encoded in the
//! returned `FetchedDatum`. The lower-level `get_bytes` used for robots.txt
//! acquisition does surface typed failures so callers can branch on the
//! HTTP status.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{redirect, Client};
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use crate::config::{Config, FetcherPolicy};
use crate::datum::{now_millis, FetchStatus, FetchedDatum, HttpHeaders, Metadata, ScoredUrlDatum};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error {status}")]
    Http { status: u16 },

    #[error("request timeout")]
    Timeout,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("DNS resolution failed")]
    Dns,

    #[error("SSL/TLS error")]
    Tls,

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

impl FetchError {
    /// Classify a reqwest error into the taxonomy above.
    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return FetchError::Timeout;
        }

        let message = error.to_string().to_lowercase();

        if message.contains("certificate") || message.contains("ssl") || message.contains("tls") {
            return FetchError::Tls;
        }

        if error.is_connect() {
            if message.contains("dns")
                || message.contains("name resolution")
                || message.contains("no such host")
            {
                return FetchError::Dns;
            }
            return FetchError::ConnectionRefused;
        }

        if error.is_body() {
            return FetchError::Body(error.to_string());
        }

        FetchError::Network(error.to_string())
    }

    /// GET requests are idempotent, so transport-level failures are safe to
    /// retry. TLS handshake failures never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout
                | FetchError::ConnectionRefused
                | FetchError::Dns
                | FetchError::Network(_)
        )
    }
}

/// A source of fetched pages. The production implementation is
/// [`HttpFetcher`]; simulations stand in for it in tests and dry runs.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Upper bound on concurrent fetches the caller may issue.
    fn max_threads(&self) -> usize;

    fn policy(&self) -> &FetcherPolicy;

    fn user_agent(&self) -> &str;

    /// Fetch one URL. Failures are encoded in the returned datum.
    async fn fetch(&self, scored: &ScoredUrlDatum) -> FetchedDatum;

    /// Fetch raw bytes, surfacing HTTP and transport failures as typed
    /// errors. A 404 yields an empty body.
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Tracks the cumulative read rate of one body transfer.
pub(crate) struct RateMonitor {
    min_rate: u64,
    reads: u32,
    rate: u64,
}

impl RateMonitor {
    pub(crate) fn new(min_rate: u64) -> Self {
        Self {
            min_rate,
            reads: 0,
            rate: 0,
        }
    }

    /// Record a completed read. Returns true when the transfer is below
    /// the rate floor and should abort. The first read is always excused:
    /// connection setup makes it look slower than the peer really is.
    pub(crate) fn observe(&mut self, total_read: usize, elapsed_ms: u64, target: usize) -> bool {
        self.reads += 1;
        self.rate = (total_read as u64).saturating_mul(1000) / elapsed_ms.max(1);
        self.reads > 1 && total_read < target && self.rate < self.min_rate
    }

    pub(crate) fn rate(&self) -> u64 {
        self.rate
    }
}

/// Connection-pooled HTTP fetcher.
///
/// The client and its pool are built up front and shared by every worker;
/// the caller keeps concurrent fetches at or below `max_threads`, so the
/// pool is never the limiting factor. One extra idle connection per host
/// leaves room for a robots.txt fetch alongside a page fetch. Dropping the
/// fetcher releases the pool's sockets.
pub struct HttpFetcher {
    max_threads: usize,
    policy: FetcherPolicy,
    user_agent: String,
    client: Client,
}

impl HttpFetcher {
    pub fn new(
        max_threads: usize,
        policy: FetcherPolicy,
        user_agent: impl Into<String>,
    ) -> Result<Self, FetchError> {
        let user_agent = user_agent.into();
        let client = Client::builder()
            .user_agent(&user_agent)
            .connect_timeout(Duration::from_secs(Config::DEFAULT_CONNECT_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(Config::DEFAULT_SOCKET_TIMEOUT_SECS))
            .pool_max_idle_per_host(policy.threads_per_host() + 1)
            .redirect(redirect::Policy::limited(policy.max_redirects()))
            .cookie_store(true)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .http1_only()
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;

        Ok(Self {
            max_threads: max_threads.max(1),
            policy,
            user_agent,
            client,
        })
    }

    /// Issue one GET and read the body under the policy limits.
    async fn do_get(&self, url: &Url, metadata: &Metadata) -> Result<FetchedDatum, FetchError> {
        tracing::trace!(url = %url, "fetching");

        let read_start = Instant::now();
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let http_status = response.status().as_u16();
        let mut status = if http_status == 200 {
            FetchStatus::Fetched
        } else {
            FetchStatus::Error
        };

        // Non-200 responses only keep a small debug window of body.
        let mut target_length = if status == FetchStatus::Fetched {
            self.policy.max_content_size()
        } else {
            Config::ERROR_CONTENT_LENGTH
        };

        let mut headers = HttpHeaders::new();
        for (name, value) in response.headers() {
            headers.add(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }

        // The header alone decides truncation; the body is read until the
        // target or EOF regardless of whether the two agree.
        let mut truncated = false;
        if let Some(length_header) = headers.first("content-length") {
            match length_header.trim().parse::<usize>() {
                Ok(content_length) => {
                    if content_length > target_length {
                        truncated = true;
                    } else {
                        target_length = content_length;
                    }
                }
                Err(_) => {
                    tracing::warn!(url = %url, value = length_header, "invalid content length header");
                }
            }
        }

        let content_type = headers.first("content-type").map(str::to_string);
        let redirected_url = response.url().to_string();

        let mut monitor = RateMonitor::new(self.policy.min_response_rate());
        let mut content: Vec<u8> = Vec::new();
        let mut error_msg = None;

        let mut stream = response.bytes_stream();
        while content.len() < target_length {
            let chunk = match stream.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    // A broken body on an already-failed page is still
                    // useful debug content; only a 200 turns into an error.
                    if status == FetchStatus::Fetched {
                        status = FetchStatus::Error;
                        error_msg = Some(FetchError::from_reqwest(e).to_string());
                    }
                    break;
                }
                None => break,
            };

            let remaining = target_length - content.len();
            if chunk.len() > remaining {
                content.extend_from_slice(&chunk[..remaining]);
                truncated = true;
            } else {
                content.extend_from_slice(&chunk);
            }

            let elapsed_ms = read_start.elapsed().as_millis() as u64;
            if monitor.observe(content.len(), elapsed_ms, target_length) {
                tracing::debug!(url = %url, rate = monitor.rate(), "read rate below floor, aborting");
                status = FetchStatus::Aborted;
                break;
            }
        }

        // Dropping the stream here closes the connection on truncated or
        // aborted transfers instead of returning it dirty to the pool.
        drop(stream);

        Ok(FetchedDatum {
            url: url.to_string(),
            redirected_url,
            status,
            http_status,
            headers,
            content,
            content_type,
            read_rate: monitor.rate(),
            fetch_time: now_millis(),
            truncated,
            error_msg,
            metadata: metadata.clone(),
        })
    }

    /// Run `do_get` under the retry policy.
    async fn get_with_retries(
        &self,
        url: &Url,
        metadata: &Metadata,
    ) -> Result<FetchedDatum, FetchError> {
        let mut attempt = 0u32;
        loop {
            match self.do_get(url, metadata).await {
                Ok(datum) => return Ok(datum),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.policy.max_retries() || !err.is_retryable() {
                        return Err(err);
                    }
                    tracing::debug!(url = %url, attempt, error = %err, "retrying fetch");
                }
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
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

        match self.get_with_retries(&url, metadata).await {
            Ok(datum) => datum,
            Err(err) => {
                tracing::debug!(url = %url, error = %err, "fetch failed");
                FetchedDatum::error(url_str, err.to_string(), metadata.clone())
            }
        }
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        let datum = self.get_with_retries(&parsed, &Metadata::new()).await?;

        match datum.http_status {
            200 => Ok(datum.content),
            404 => Ok(Vec::new()),
            status => Err(FetchError::Http { status }),
        }
    }
}
