//! `Origin` checks for the WebSocket handshake.
//!
//! The bridge listens on loopback, which any page loaded in the user's browser can
//! reach. Only the embedded front-end's origins may upgrade.

use axum::http::{header, HeaderMap};
use tracing::debug;

/// Hosts the embedded web view serves the front-end from
pub const DEFAULT_ALLOWED_HOSTS: &[&str] = &["wails.localhost", "wails"];

#[derive(Debug, Clone)]
pub struct OriginValidator {
    allowed_hosts: Vec<String>,
}

impl Default for OriginValidator {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_HOSTS.iter().copied())
    }
}

impl OriginValidator {
    pub fn new<I, S>(allowed_hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_hosts: allowed_hosts.into_iter().map(Into::into).collect(),
        }
    }

    /// Accept only an origin whose host matches the allow-list. ASCII letters
    /// compare case-insensitively and every other byte must match exactly. Any
    /// port is accepted.
    pub fn validate(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return false;
        };

        let Some(host) = origin_host(origin) else {
            debug!("[origin] Unparseable origin {:?}", origin);
            return false;
        };

        self.allowed_hosts
            .iter()
            .any(|allowed| host.eq_ignore_ascii_case(allowed))
    }

    /// Validate the first `Origin` header of a request.
    pub fn validate_headers(&self, headers: &HeaderMap) -> bool {
        let origin = headers
            .get(header::ORIGIN)
            .and_then(|value| value.to_str().ok());
        self.validate(origin)
    }
}

/// Host of a `scheme://[userinfo@]host[:port][/path]` origin, taken from the
/// raw header bytes. No IDNA mapping or percent-decoding is applied.
fn origin_host(origin: &str) -> Option<&str> {
    let (scheme, rest) = origin.split_once("://")?;
    if !is_scheme(scheme) {
        return None;
    }

    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    split_host_port(authority)
}

/// Strip an optional `:port`. A host with no port is returned whole; a port
/// that is not all digits makes the origin invalid.
fn split_host_port(authority: &str) -> Option<&str> {
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, rest) = bracketed.split_once(']')?;
        match rest {
            "" => return Some(host),
            _ => (host, rest.strip_prefix(':')?),
        }
    } else {
        match authority.rsplit_once(':') {
            // More than one colon outside brackets is not a host:port pair
            Some((host, _)) if host.contains(':') => return Some(authority),
            Some(pair) => pair,
            None => return Some(authority),
        }
    };

    port.bytes().all(|b| b.is_ascii_digit()).then_some(host)
}

fn is_scheme(scheme: &str) -> bool {
    let mut bytes = scheme.bytes();
    matches!(bytes.next(), Some(b) if b.is_ascii_alphabetic())
        && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_rejects_missing_and_foreign_origins() {
        let validator = OriginValidator::default();

        assert!(!validator.validate(None));
        assert!(!validator.validate(Some("http://evil.example")));
        assert!(!validator.validate(Some("http://wails.localhost.evil.com")));
        assert!(!validator.validate(Some("http://evil.com/wails.localhost")));
        assert!(!validator.validate(Some("null")));
        assert!(!validator.validate(Some("")));
        assert!(!validator.validate(Some("wails.localhost")));
        assert!(!validator.validate(Some("://wails")));
        assert!(!validator.validate(Some("http://wails:abc")));
        assert!(!validator.validate(Some("http://evil.com@")));
    }

    #[test]
    fn test_non_ascii_hosts_compare_verbatim() {
        let validator = OriginValidator::default();

        // Fullwidth letters and U+017F LATIN SMALL LETTER LONG S
        assert!(!validator.validate(Some("http://\u{ff57}\u{ff41}\u{ff49}\u{ff4c}\u{ff53}")));
        assert!(!validator.validate(Some("http://wail\u{17f}")));
        assert!(!validator.validate(Some("http://wa\u{130}ls.localhost")));
        // Percent-escapes are not decoded
        assert!(!validator.validate(Some("http://wail%73")));
    }

    #[test]
    fn test_host_extraction() {
        assert_eq!(origin_host("http://wails.localhost"), Some("wails.localhost"));
        assert_eq!(origin_host("http://wails.localhost:99999"), Some("wails.localhost"));
        assert_eq!(origin_host("http://wails:"), Some("wails"));
        assert_eq!(origin_host("https://user:pw@wails/x?y#z"), Some("wails"));
        assert_eq!(origin_host("http://[::1]:8080"), Some("::1"));
        assert_eq!(origin_host("http://[::1]"), Some("::1"));
        assert_eq!(origin_host("http://a:b:1"), Some("a:b:1"));
        assert_eq!(origin_host("http://wails:80x"), None);
        assert_eq!(origin_host("1http://wails"), None);
        assert_eq!(origin_host("null"), None);
    }

    #[test]
    fn test_accepts_allowed_hosts() {
        let validator = OriginValidator::default();

        assert!(validator.validate(Some("http://wails.localhost")));
        assert!(validator.validate(Some("HTTP://WAILS")));
        assert!(validator.validate(Some("http://wails.localhost:1234")));
        assert!(validator.validate(Some("wails://wails")));
        assert!(validator.validate(Some("https://Wails.LocalHost/")));
        assert!(validator.validate(Some("http://wails.localhost:99999")));
        assert!(validator.validate(Some("http://wails?x")));
    }

    #[test]
    fn test_custom_allow_list() {
        let validator = OriginValidator::new(["app.localhost"]);

        assert!(validator.validate(Some("http://app.localhost:5173")));
        assert!(!validator.validate(Some("http://wails.localhost")));
    }

    #[test]
    fn test_validate_headers() {
        let validator = OriginValidator::default();
        let mut headers = HeaderMap::new();
        assert!(!validator.validate_headers(&headers));

        headers.insert(
            header::ORIGIN,
            HeaderValue::from_static("http://wails.localhost"),
        );
        assert!(validator.validate_headers(&headers));

        headers.insert(header::ORIGIN, HeaderValue::from_static("http://localhost"));
        assert!(!validator.validate_headers(&headers));
    }
}
