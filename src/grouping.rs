//! Grouping-key assignment: one DNS + robots.txt decision per URL.
//!
//! URLs that share a destination and a crawl rate get the same key, so the
//! grouping step downstream produces exactly one host queue per physical
//! crawl stream. URLs that must not be fetched in this run get a sentinel
//! key that short-circuits straight to the status stream.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::Config;
use crate::datum::{UrlDatum, UrlStatus};
use crate::domains;
use crate::fetcher::{FetchError, Fetcher};
use crate::robots::RobotsRules;

#[derive(Debug, Error)]
pub enum GroupingError {
    #[error("unable to parse URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Where a URL belongs, and whether it is fetchable at all.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupingKey {
    /// One physical crawl stream: a destination plus its pacing interval.
    Fetchable { domain: String, crawl_delay_ms: u64 },
    /// DNS resolution failed.
    UnknownHost,
    /// robots.txt forbids this URL.
    Blocked,
    /// robots.txt could not be fetched; revisit the host in a later run.
    Deferred,
    /// Dropped by scoring.
    Skipped,
}

impl GroupingKey {
    pub fn is_fetchable(&self) -> bool {
        matches!(self, GroupingKey::Fetchable { .. })
    }

    /// Terminal status for sentinel keys, None for fetchable ones.
    pub fn sentinel_status(&self) -> Option<UrlStatus> {
        match self {
            GroupingKey::Fetchable { .. } => None,
            GroupingKey::UnknownHost => Some(UrlStatus::UnknownHost),
            GroupingKey::Blocked => Some(UrlStatus::Blocked),
            GroupingKey::Deferred => Some(UrlStatus::Deferred),
            GroupingKey::Skipped => Some(UrlStatus::Skipped),
        }
    }

    pub fn crawl_delay(&self) -> Option<Duration> {
        match self {
            GroupingKey::Fetchable { crawl_delay_ms, .. } => {
                Some(Duration::from_millis(*crawl_delay_ms))
            }
            _ => None,
        }
    }
}

impl fmt::Display for GroupingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupingKey::Fetchable {
                domain,
                crawl_delay_ms,
            } => write!(f, "{}-{}", domain, crawl_delay_ms),
            GroupingKey::UnknownHost => write!(f, "UNKNOWN_HOST"),
            GroupingKey::Blocked => write!(f, "BLOCKED"),
            GroupingKey::Deferred => write!(f, "DEFERRED"),
            GroupingKey::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Classifies URLs into grouping keys.
///
/// Holds a bad-host set for failed DNS lookups and an LRU cache of parsed
/// robots rules per host. Not internally locked: it runs inside a single
/// pipeline task.
pub struct GroupingKeyGenerator {
    user_agent: String,
    robots_fetcher: Arc<dyn Fetcher>,
    default_delay: Duration,
    group_by_ip: bool,
    bad_hosts: HashSet<String>,
    rules: LruCache<String, RobotsRules>,
}

impl GroupingKeyGenerator {
    pub fn new(
        user_agent: impl Into<String>,
        robots_fetcher: Arc<dyn Fetcher>,
        default_delay: Duration,
        group_by_ip: bool,
    ) -> Self {
        let capacity = NonZeroUsize::new(Config::ROBOTS_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            user_agent: user_agent.into(),
            robots_fetcher,
            default_delay,
            group_by_ip,
            bad_hosts: HashSet::new(),
            rules: LruCache::new(capacity),
        }
    }

    /// Assign the grouping key for one URL.
    ///
    /// A malformed URL is an input error surfaced to the caller; every
    /// other failure folds into a sentinel key.
    pub async fn grouping_key(&mut self, datum: &UrlDatum) -> Result<GroupingKey, GroupingError> {
        let url = Url::parse(&datum.url).map_err(|e| GroupingError::InvalidUrl {
            url: datum.url.clone(),
            reason: e.to_string(),
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| GroupingError::InvalidUrl {
                url: datum.url.clone(),
                reason: "URL has no host".to_string(),
            })?
            .to_ascii_lowercase();

        if self.bad_hosts.contains(&host) {
            return Ok(GroupingKey::UnknownHost);
        }

        let resolved = if self.group_by_ip {
            match resolve_host(&host, url.port_or_known_default().unwrap_or(80)).await {
                Some(addr) => Some(addr),
                None => {
                    tracing::debug!(host = %host, "DNS resolution failed, caching as bad host");
                    self.bad_hosts.insert(host);
                    return Ok(GroupingKey::UnknownHost);
                }
            }
        } else {
            None
        };

        let rules = match self.rules.get(&host) {
            Some(rules) => rules.clone(),
            None => {
                let rules = self.fetch_rules(&url).await;
                self.rules.put(host.clone(), rules.clone());
                rules
            }
        };

        if rules.defer_visits() {
            return Ok(GroupingKey::Deferred);
        }
        if !rules.is_allowed(&datum.url) {
            return Ok(GroupingKey::Blocked);
        }

        let domain = match resolved {
            Some(addr) => addr.to_string(),
            None => domains::extract_pld(&host),
        };

        Ok(GroupingKey::Fetchable {
            domain,
            crawl_delay_ms: rules.crawl_delay().as_millis() as u64,
        })
    }

    async fn fetch_rules(&self, url: &Url) -> RobotsRules {
        let robots_url = match domains::robots_url(url) {
            Some(robots_url) => robots_url,
            None => {
                return RobotsRules::from_status(&self.user_agent, 500, self.default_delay);
            }
        };

        match self.robots_fetcher.get_bytes(&robots_url).await {
            Ok(body) => RobotsRules::from_content(&self.user_agent, &body, self.default_delay),
            Err(FetchError::Http { status }) => {
                RobotsRules::from_status(&self.user_agent, status, self.default_delay)
            }
            Err(e) => {
                tracing::debug!(url = %robots_url, error = %e, "robots.txt fetch failed");
                RobotsRules::from_status(&self.user_agent, 500, self.default_delay)
            }
        }
    }
}

async fn resolve_host(host: &str, port: u16) -> Option<IpAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map(|addr| addr.ip())
}
