//! Robots exclusion rules for one host, including the fallback semantics
//! used when robots.txt itself cannot be fetched.

use robotstxt::DefaultMatcher;
use std::time::Duration;

/// How the rules answer allow/deny checks.
#[derive(Debug, Clone, PartialEq)]
enum Access {
    /// No restrictions apply.
    AllowAll,
    /// The site forbids all crawling (robots.txt returned 401/403).
    AllowNone,
    /// Match each URL against the stored robots.txt body.
    Rules(String),
}

/// Parsed crawl permissions for a single host and user agent.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotsRules {
    user_agent: String,
    access: Access,
    crawl_delay: Duration,
    defer_visits: bool,
}

impl RobotsRules {
    /// Build rules from a fetched robots.txt body.
    pub fn from_content(user_agent: &str, body: &[u8], default_delay: Duration) -> Self {
        let content = String::from_utf8_lossy(body).into_owned();
        let crawl_delay =
            extract_crawl_delay(&content, user_agent).unwrap_or(default_delay);

        Self {
            user_agent: user_agent.to_string(),
            access: Access::Rules(content),
            crawl_delay,
            defer_visits: false,
        }
    }

    /// Build rules for a host whose robots.txt could not be fetched.
    ///
    /// 401 and 403 are read as "this site forbids crawling". Other 4xx
    /// responses, except 429, mean no robots.txt exists, so no
    /// restrictions. 429 and server-side failures mean the host should be
    /// revisited later.
    pub fn from_status(user_agent: &str, status: u16, default_delay: Duration) -> Self {
        let (access, defer_visits) = match status {
            401 | 403 => (Access::AllowNone, false),
            429 => (Access::AllowAll, true),
            400..=499 => (Access::AllowAll, false),
            _ => (Access::AllowAll, true),
        };

        Self {
            user_agent: user_agent.to_string(),
            access,
            crawl_delay: default_delay,
            defer_visits,
        }
    }

    /// Whether this user agent may fetch `url`.
    pub fn is_allowed(&self, url: &str) -> bool {
        match &self.access {
            Access::AllowAll => true,
            Access::AllowNone => false,
            Access::Rules(content) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(content, &self.user_agent, url)
            }
        }
    }

    /// Minimum interval between requests to this host.
    pub fn crawl_delay(&self) -> Duration {
        self.crawl_delay
    }

    /// True when robots.txt was unreachable and the host should be
    /// deferred to a later run.
    pub fn defer_visits(&self) -> bool {
        self.defer_visits
    }
}

/// Pull the `Crawl-delay` directive for the applicable agent group.
/// Fractional seconds are rounded up.
fn extract_crawl_delay(content: &str, user_agent: &str) -> Option<Duration> {
    let agent_lower = user_agent.to_ascii_lowercase();
    let mut in_matching_group = false;
    let mut matched_delay: Option<f64> = None;
    let mut wildcard_delay: Option<f64> = None;
    let mut group_is_wildcard = false;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let lower = line.to_ascii_lowercase();
        if let Some(agent) = lower.strip_prefix("user-agent:") {
            let agent = agent.trim();
            group_is_wildcard = agent == "*";
            in_matching_group = group_is_wildcard || agent_lower.contains(agent);
        } else if let Some(value) = lower.strip_prefix("crawl-delay:") {
            if !in_matching_group {
                continue;
            }
            if let Ok(secs) = value.trim().parse::<f64>() {
                if secs >= 0.0 {
                    if group_is_wildcard {
                        wildcard_delay.get_or_insert(secs);
                    } else {
                        matched_delay.get_or_insert(secs);
                    }
                }
            }
        }
    }

    matched_delay
        .or(wildcard_delay)
        .map(|secs| Duration::from_secs(secs.ceil() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT: &str = "testbot";
    const DEFAULT_DELAY: Duration = Duration::from_secs(30);

    #[test]
    fn test_allow_all_on_empty_body() {
        let rules = RobotsRules::from_content(AGENT, b"", DEFAULT_DELAY);
        assert!(rules.is_allowed("http://test.local/anything"));
        assert!(!rules.defer_visits());
        assert_eq!(rules.crawl_delay(), DEFAULT_DELAY);
    }

    #[test]
    fn test_disallow_all() {
        let body = b"User-agent: *\nDisallow: /";
        let rules = RobotsRules::from_content(AGENT, body, DEFAULT_DELAY);
        assert!(!rules.is_allowed("http://test.local/page"));
    }

    #[test]
    fn test_path_prefix_rules() {
        let body = b"User-agent: *\nDisallow: /private\nAllow: /private/ok";
        let rules = RobotsRules::from_content(AGENT, body, DEFAULT_DELAY);

        assert!(rules.is_allowed("http://test.local/public"));
        assert!(!rules.is_allowed("http://test.local/private/secret"));
        assert!(rules.is_allowed("http://test.local/private/ok/page"));
    }

    #[test]
    fn test_crawl_delay_parsing() {
        let body = b"User-agent: *\nCrawl-delay: 5\nDisallow: /admin";
        let rules = RobotsRules::from_content(AGENT, body, DEFAULT_DELAY);
        assert_eq!(rules.crawl_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_crawl_delay_fractional_rounds_up() {
        let body = b"User-agent: *\nCrawl-delay: 0.5";
        let rules = RobotsRules::from_content(AGENT, body, DEFAULT_DELAY);
        assert_eq!(rules.crawl_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_crawl_delay_specific_agent_wins() {
        let body = b"User-agent: testbot\nCrawl-delay: 10\n\nUser-agent: *\nCrawl-delay: 2";
        let rules = RobotsRules::from_content(AGENT, body, DEFAULT_DELAY);
        assert_eq!(rules.crawl_delay(), Duration::from_secs(10));

        let other = RobotsRules::from_content("otherbot", body, DEFAULT_DELAY);
        assert_eq!(other.crawl_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_status_forbidden() {
        for status in [401, 403] {
            let rules = RobotsRules::from_status(AGENT, status, DEFAULT_DELAY);
            assert!(!rules.is_allowed("http://test.local/"), "status {}", status);
            assert!(!rules.defer_visits());
        }
    }

    #[test]
    fn test_status_not_found_allows_all() {
        let rules = RobotsRules::from_status(AGENT, 404, DEFAULT_DELAY);
        assert!(rules.is_allowed("http://test.local/"));
        assert!(!rules.defer_visits());
    }

    #[test]
    fn test_status_defers() {
        for status in [429, 500, 503, 0] {
            let rules = RobotsRules::from_status(AGENT, status, DEFAULT_DELAY);
            assert!(rules.defer_visits(), "status {}", status);
        }
    }
}
