//! Host and domain helpers used by grouping and robots acquisition.

use url::Url;

/// Extract the lowercased host portion of a URL.
pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_ascii_lowercase()))
}

/// Second-level labels that act as an effective TLD together with a
/// two-letter country code (example.co.uk style).
const SHARED_SECOND_LEVELS: &[&str] = &["co", "com", "net", "org", "gov", "ac", "edu"];

/// Return the paid-level domain for a hostname.
///
/// Uses a label heuristic rather than the full public-suffix list: the last
/// two labels, or the last three when the host ends in a shared second
/// level under a country-code TLD.
pub fn extract_pld(hostname: &str) -> String {
    let parts: Vec<&str> = hostname.split('.').collect();

    if parts.len() < 3 {
        return hostname.to_string();
    }

    let tld = parts[parts.len() - 1];
    let second = parts[parts.len() - 2];
    let labels = if tld.len() == 2 && SHARED_SECOND_LEVELS.contains(&second) {
        3
    } else {
        2
    };

    parts[parts.len() - labels..].join(".")
}

/// Build the robots.txt URL for the scheme, host, and port of `url`.
pub fn robots_url(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let port = match url.port() {
        Some(p) => format!(":{}", p),
        None => String::new(),
    };
    Some(format!("{}://{}{}/robots.txt", url.scheme(), host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_host() {
        assert_eq!(
            extract_host("http://Example.COM/path"),
            Some("example.com".to_string())
        );
        assert_eq!(extract_host("not a url"), None);
    }

    #[test]
    fn test_extract_pld() {
        assert_eq!(extract_pld("www.example.com"), "example.com");
        assert_eq!(extract_pld("a.b.example.com"), "example.com");
        assert_eq!(extract_pld("example.com"), "example.com");
        assert_eq!(extract_pld("a.b.example.co.uk"), "example.co.uk");
        assert_eq!(extract_pld("localhost"), "localhost");
    }

    #[test]
    fn test_robots_url() {
        let url = Url::parse("http://test.local/deep/page.html").unwrap();
        assert_eq!(
            robots_url(&url),
            Some("http://test.local/robots.txt".to_string())
        );

        let with_port = Url::parse("http://test.local:8080/page").unwrap();
        assert_eq!(
            robots_url(&with_port),
            Some("http://test.local:8080/robots.txt".to_string())
        );
    }
}
