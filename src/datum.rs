//! Record types that flow through the fetch stage.
//!
//! A `UrlDatum` enters the stage, picks up a grouping key and a score, and
//! leaves as exactly one `StatusDatum` plus, when the fetch succeeded, one
//! `FetchedDatum` on the content stream. Opaque metadata rides along
//! unchanged on every hop.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::grouping::GroupingKey;

/// Opaque per-URL metadata, propagated verbatim into every output record.
pub type Metadata = BTreeMap<String, String>;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Lifecycle status of a URL within a crawl run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UrlStatus {
    Unfetched,
    Fetched,
    FetchError,
    Aborted,
    Blocked,
    UnknownHost,
    Deferred,
    Skipped,
}

impl fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UrlStatus::Unfetched => "UNFETCHED",
            UrlStatus::Fetched => "FETCHED",
            UrlStatus::FetchError => "FETCH_ERROR",
            UrlStatus::Aborted => "ABORTED",
            UrlStatus::Blocked => "BLOCKED",
            UrlStatus::UnknownHost => "UNKNOWN_HOST",
            UrlStatus::Deferred => "DEFERRED",
            UrlStatus::Skipped => "SKIPPED",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a single HTTP fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchStatus {
    Fetched,
    Error,
    Aborted,
}

/// A candidate URL with its fetch history and pipeline metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlDatum {
    pub url: String,
    /// When this URL was last fetched (epoch ms, 0 = never).
    pub last_fetched: u64,
    /// When the source record was last updated (epoch ms).
    pub last_updated: u64,
    pub status: UrlStatus,
    pub metadata: Metadata,
}

impl UrlDatum {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            last_fetched: 0,
            last_updated: 0,
            status: UrlStatus::Unfetched,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A `UrlDatum` after grouping-key assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedUrlDatum {
    pub datum: UrlDatum,
    pub key: GroupingKey,
}

impl GroupedUrlDatum {
    pub fn new(datum: UrlDatum, key: GroupingKey) -> Self {
        Self { datum, key }
    }
}

/// A grouped URL with its fetch-priority score in `[0.0, 1.0]`.
///
/// Scores below zero mean "skip this URL" (see `scoring::SKIP_SCORE`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredUrlDatum {
    pub datum: UrlDatum,
    pub key: GroupingKey,
    pub score: f64,
}

impl ScoredUrlDatum {
    pub fn new(grouped: GroupedUrlDatum, score: f64) -> Self {
        Self {
            datum: grouped.datum,
            key: grouped.key,
            score,
        }
    }

    pub fn url(&self) -> &str {
        &self.datum.url
    }
}

/// HTTP response headers: case-insensitive names, values kept in insertion
/// order per name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpHeaders {
    entries: Vec<(String, Vec<String>)>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        if let Some((_, values)) = self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            values.push(value.into());
        } else {
            self.entries.push((name.to_string(), vec![value.into()]));
        }
    }

    /// First value recorded for `name`, if any.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    /// All values recorded for `name`, in insertion order.
    pub fn all(&self, name: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The result of one HTTP fetch: response content plus transfer telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedDatum {
    pub url: String,
    /// Final URL after redirect following.
    pub redirected_url: String,
    pub status: FetchStatus,
    /// HTTP status code, 0 when the request never produced a response.
    pub http_status: u16,
    pub headers: HttpHeaders,
    /// Response body, possibly truncated to the policy cap.
    pub content: Vec<u8>,
    pub content_type: Option<String>,
    /// Measured read rate in bytes per second.
    pub read_rate: u64,
    /// Completion time (epoch ms).
    pub fetch_time: u64,
    /// True when the server offered more bytes than the policy cap.
    pub truncated: bool,
    pub error_msg: Option<String>,
    pub metadata: Metadata,
}

impl FetchedDatum {
    /// Datum for a fetch that failed before any response arrived.
    pub fn error(url: impl Into<String>, message: impl Into<String>, metadata: Metadata) -> Self {
        let url = url.into();
        Self {
            redirected_url: url.clone(),
            url,
            status: FetchStatus::Error,
            http_status: 0,
            headers: HttpHeaders::new(),
            content: Vec::new(),
            content_type: None,
            read_rate: 0,
            fetch_time: now_millis(),
            truncated: false,
            error_msg: Some(message.into()),
            metadata,
        }
    }
}

/// Terminal disposition of one input URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDatum {
    pub url: String,
    pub status: UrlStatus,
    /// HTTP status code, 0 when no request was made.
    pub http_status: u16,
    pub error_msg: Option<String>,
    /// Completion time (epoch ms).
    pub status_time: u64,
    pub metadata: Metadata,
}

impl StatusDatum {
    pub fn new(
        url: impl Into<String>,
        status: UrlStatus,
        http_status: u16,
        error_msg: Option<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            url: url.into(),
            status,
            http_status,
            error_msg,
            status_time: now_millis(),
            metadata,
        }
    }

    /// Derive the status record matching a completed fetch.
    pub fn from_fetched(fetched: &FetchedDatum) -> Self {
        let status = match fetched.status {
            FetchStatus::Fetched => UrlStatus::Fetched,
            FetchStatus::Error => UrlStatus::FetchError,
            FetchStatus::Aborted => UrlStatus::Aborted,
        };

        Self {
            url: fetched.url.clone(),
            status,
            http_status: fetched.http_status,
            error_msg: fetched.error_msg.clone(),
            status_time: fetched.fetch_time,
            metadata: fetched.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = HttpHeaders::new();
        headers.add("Content-Type", "text/html");
        headers.add("content-type", "text/plain");

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.first("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(headers.all("content-type").len(), 2);
    }

    #[test]
    fn test_headers_value_order() {
        let mut headers = HttpHeaders::new();
        headers.add("Set-Cookie", "a=1");
        headers.add("Set-Cookie", "b=2");
        headers.add("Set-Cookie", "c=3");

        assert_eq!(headers.all("set-cookie"), &["a=1", "b=2", "c=3"]);
    }

    #[test]
    fn test_error_datum() {
        let datum = FetchedDatum::error("http://bad.local", "boom", Metadata::new());
        assert_eq!(datum.status, FetchStatus::Error);
        assert_eq!(datum.http_status, 0);
        assert_eq!(datum.error_msg.as_deref(), Some("boom"));
        assert!(datum.content.is_empty());
    }

    #[test]
    fn test_status_from_fetched() {
        let mut metadata = Metadata::new();
        metadata.insert("key".to_string(), "value".to_string());

        let mut fetched = FetchedDatum::error("http://test.local/a", "oops", metadata.clone());
        fetched.status = FetchStatus::Aborted;
        fetched.http_status = 200;

        let status = StatusDatum::from_fetched(&fetched);
        assert_eq!(status.status, UrlStatus::Aborted);
        assert_eq!(status.http_status, 200);
        assert_eq!(status.metadata, metadata);
    }

    #[test]
    fn test_scored_datum_roundtrip() {
        let datum = UrlDatum::new("http://test.local/page");
        let grouped = GroupedUrlDatum::new(
            datum,
            GroupingKey::Fetchable {
                domain: "test.local".to_string(),
                crawl_delay_ms: 1000,
            },
        );
        let scored = ScoredUrlDatum::new(grouped, 0.5);

        let json = serde_json::to_string(&scored).unwrap();
        let back: ScoredUrlDatum = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scored);
    }
}
