//! Counters tracking the progress of a fetch run.

use crate::datum::UrlStatus;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters shared by the driver, the workers, and the
/// grouping step.
#[derive(Debug, Default)]
pub struct FetchMetrics {
    pub fetched: AtomicU64,
    pub errors: AtomicU64,
    pub aborted: AtomicU64,
    pub skipped: AtomicU64,
    pub blocked: AtomicU64,
    pub deferred: AtomicU64,
    pub unknown_host: AtomicU64,
    pub bytes_fetched: AtomicU64,
}

impl FetchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_status(&self, status: UrlStatus) {
        let counter = match status {
            UrlStatus::Fetched => &self.fetched,
            UrlStatus::FetchError => &self.errors,
            UrlStatus::Aborted => &self.aborted,
            UrlStatus::Skipped => &self.skipped,
            UrlStatus::Blocked => &self.blocked,
            UrlStatus::Deferred => &self.deferred,
            UrlStatus::UnknownHost => &self.unknown_host,
            UrlStatus::Unfetched => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_content_bytes(&self, bytes: usize) {
        self.bytes_fetched.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fetched: self.fetched.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            unknown_host: self.unknown_host.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub fetched: u64,
    pub errors: u64,
    pub aborted: u64,
    pub skipped: u64,
    pub blocked: u64,
    pub deferred: u64,
    pub unknown_host: u64,
    pub bytes_fetched: u64,
}

impl MetricsSnapshot {
    /// Total URLs that received a terminal status.
    pub fn total(&self) -> u64 {
        self.fetched
            + self.errors
            + self.aborted
            + self.skipped
            + self.blocked
            + self.deferred
            + self.unknown_host
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched {} ({} bytes), errors {}, aborted {}, skipped {}, blocked {}, deferred {}, unknown-host {}",
            self.fetched,
            self.bytes_fetched,
            self.errors,
            self.aborted,
            self.skipped,
            self.blocked,
            self.deferred,
            self.unknown_host
        )
    }
}
