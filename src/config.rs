//! Crate tuning constants and the per-run fetch policy.

use serde::{Deserialize, Serialize};

pub struct Config;

impl Config {
    pub const DEFAULT_SOCKET_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

    /// Bytes of body kept on non-200 responses for debugging.
    pub const ERROR_CONTENT_LENGTH: usize = 1024;

    /// In-memory element cap per host queue before spilling to disk.
    pub const HOST_QUEUE_MEMORY_CAP: usize = 512;

    /// Capacity of the host to robots-rules cache.
    pub const ROBOTS_CACHE_CAPACITY: usize = 64 * 1024;

    /// How long the driver waits for a queue to become ready per cycle.
    pub const TAKE_READY_TIMEOUT_MS: u64 = 100;
}

/// Immutable bundle of crawl knobs, shared by every component of a run.
///
/// Serialized as JSON under [`FetcherPolicy::JOB_CONF_KEY`] so remote
/// workers reconstruct the same policy from the job configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetcherPolicy {
    crawl_end_time: u64,
    min_response_rate: u64,
    max_content_size: usize,
    default_crawl_delay: u64,
    max_redirects: usize,
    threads_per_host: usize,
    max_retries: u32,
}

impl FetcherPolicy {
    /// Job-configuration key the serialized policy travels under.
    pub const JOB_CONF_KEY: &'static str = "batchfetch.fetcher.policy";

    /// Sentinel end time meaning "no deadline".
    pub const NO_CRAWL_END_TIME: u64 = u64::MAX;

    pub const DEFAULT_CRAWL_DELAY_MS: u64 = 30 * 1000;
    pub const DEFAULT_MAX_CONTENT_SIZE: usize = 64 * 1024;
    pub const DEFAULT_MAX_REDIRECTS: usize = 20;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn new() -> Self {
        Self {
            crawl_end_time: Self::NO_CRAWL_END_TIME,
            min_response_rate: 0,
            max_content_size: Self::DEFAULT_MAX_CONTENT_SIZE,
            default_crawl_delay: Self::DEFAULT_CRAWL_DELAY_MS,
            max_redirects: Self::DEFAULT_MAX_REDIRECTS,
            threads_per_host: 1,
            max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_crawl_end_time(mut self, end_time_ms: u64) -> Self {
        self.crawl_end_time = end_time_ms;
        self
    }

    pub fn with_min_response_rate(mut self, bytes_per_sec: u64) -> Self {
        self.min_response_rate = bytes_per_sec;
        self
    }

    pub fn with_max_content_size(mut self, bytes: usize) -> Self {
        self.max_content_size = bytes;
        self
    }

    pub fn with_default_crawl_delay(mut self, delay_ms: u64) -> Self {
        self.default_crawl_delay = delay_ms;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn with_threads_per_host(mut self, threads: usize) -> Self {
        self.threads_per_host = threads.max(1);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Absolute crawl deadline (epoch ms).
    pub fn crawl_end_time(&self) -> u64 {
        self.crawl_end_time
    }

    /// Minimum acceptable read rate in bytes per second (0 = unlimited).
    pub fn min_response_rate(&self) -> u64 {
        self.min_response_rate
    }

    pub fn max_content_size(&self) -> usize {
        self.max_content_size
    }

    /// Delay between requests to one host when robots.txt names none.
    pub fn default_crawl_delay(&self) -> u64 {
        self.default_crawl_delay
    }

    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    pub fn threads_per_host(&self) -> usize {
        self.threads_per_host
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for FetcherPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = FetcherPolicy::new();
        assert_eq!(policy.crawl_end_time(), FetcherPolicy::NO_CRAWL_END_TIME);
        assert_eq!(policy.min_response_rate(), 0);
        assert_eq!(policy.threads_per_host(), 1);
        assert_eq!(policy.max_retries(), 3);
    }

    #[test]
    fn test_threads_per_host_floor() {
        let policy = FetcherPolicy::new().with_threads_per_host(0);
        assert_eq!(policy.threads_per_host(), 1);
    }

    #[test]
    fn test_policy_json_roundtrip() {
        let policy = FetcherPolicy::new()
            .with_crawl_end_time(12345)
            .with_min_response_rate(1000)
            .with_max_content_size(8192)
            .with_default_crawl_delay(250);

        let json = policy.to_json().unwrap();
        let back = FetcherPolicy::from_json(&json).unwrap();
        assert_eq!(back, policy);
    }
}
