//! Target extraction from inbound request paths.
//!
//! A proxy request embeds the full target URL in its path:
//! `/https://example.com/some/page?q=1`. The resolver reconstructs the
//! absolute URL and guards against the gateway being pointed at itself,
//! which would recurse forever.
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::Url;

/// Matches `/<scheme>:` followed by one or two slashes and the remainder.
/// Browsers and intermediaries occasionally collapse `//` after the scheme,
/// so both forms are accepted.
static TARGET_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/(https?:)/{1,2}(.+)$").expect("target pattern is valid"));

/// Errors produced while resolving a proxy target.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// The path does not carry the `/<scheme>://...` pattern at all. The
    /// request is simply not a proxy request and falls through to 404.
    #[error("request path does not name a proxy target")]
    NotAProxyRequest,

    /// The embedded target URL could not be parsed.
    #[error("invalid proxy target: {0}")]
    InvalidTarget(String),

    /// The target host is the gateway itself.
    #[error("Proxying to itself is not allowed")]
    SelfLoop,
}

/// Resolve the absolute target URL embedded in `path_and_query`.
///
/// `public_host` is the hostname the gateway itself is advertised at; a
/// target resolving to it is rejected so a page rewritten to route through
/// the gateway can never recurse into the gateway.
pub fn resolve_target(path_and_query: &str, public_host: &str) -> Result<Url, TargetError> {
    let captures = TARGET_PATTERN
        .captures(path_and_query)
        .ok_or(TargetError::NotAProxyRequest)?;

    // Reconstruct `scheme://rest` regardless of how many slashes survived.
    let raw = format!("{}//{}", &captures[1], &captures[2]);
    let target =
        Url::parse(&raw).map_err(|e| TargetError::InvalidTarget(format!("{raw}: {e}")))?;

    match target.host_str() {
        Some(host) if host.eq_ignore_ascii_case(public_host) => Err(TargetError::SelfLoop),
        Some(_) => Ok(target),
        None => Err(TargetError::InvalidTarget(format!("{raw}: missing host"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_simple_https_target() {
        let target = resolve_target("/https://example.com/foo", "gateway.test").unwrap();
        assert_eq!(target.as_str(), "https://example.com/foo");
    }

    #[test]
    fn resolves_http_target_with_query() {
        let target = resolve_target("/http://example.com/search?q=rust&page=2", "gateway.test")
            .unwrap();
        assert_eq!(target.as_str(), "http://example.com/search?q=rust&page=2");
        assert_eq!(target.query(), Some("q=rust&page=2"));
    }

    #[test]
    fn accepts_single_slash_after_scheme() {
        let target = resolve_target("/https:/example.com/foo", "gateway.test").unwrap();
        assert_eq!(target.host_str(), Some("example.com"));
        assert_eq!(target.path(), "/foo");
    }

    #[test]
    fn non_proxy_paths_fall_through() {
        assert_eq!(
            resolve_target("/favicon.ico", "gateway.test"),
            Err(TargetError::NotAProxyRequest)
        );
        assert_eq!(
            resolve_target("/", "gateway.test"),
            Err(TargetError::NotAProxyRequest)
        );
        // Unsupported scheme is not a proxy request either.
        assert_eq!(
            resolve_target("/ftp://example.com/file", "gateway.test"),
            Err(TargetError::NotAProxyRequest)
        );
    }

    #[test]
    fn rejects_self_loop() {
        assert_eq!(
            resolve_target("/https://gateway.test/anything", "gateway.test"),
            Err(TargetError::SelfLoop)
        );
        // Host comparison is case-insensitive.
        assert_eq!(
            resolve_target("/https://Gateway.Test/anything", "gateway.test"),
            Err(TargetError::SelfLoop)
        );
    }

    #[test]
    fn sibling_hosts_are_not_self_loops() {
        assert!(resolve_target("/https://sub.gateway.test/x", "gateway.test").is_ok());
    }

    #[test]
    fn rejects_unparseable_target() {
        assert!(matches!(
            resolve_target("/https://exa mple.com/x", "gateway.test"),
            Err(TargetError::InvalidTarget(_))
        ));
    }

    #[test]
    fn port_is_preserved_in_target() {
        let target = resolve_target("/http://example.com:8080/api", "gateway.test").unwrap();
        assert_eq!(target.port(), Some(8080));
    }
}
