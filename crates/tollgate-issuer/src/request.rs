//! Externally visible request URL reconstruction.
//!
//! The issuer usually sits behind a proxy, so the scheme and host a browser
//! sees come from forwarding headers rather than the socket. Everything
//! derived from "where am I reachable" - the JWT `iss`, well-known
//! documents, magic links, OAuth2 callback URLs - goes through here.

use axum::http::HeaderMap;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// True when the user agent reached us over HTTPS.
///
/// Set iff `X-Forwarded-Proto: https`, `X-Forwarded-Ssl: on`, or the
/// request itself carried an `https` scheme (absolute-form URI).
pub fn is_secure(headers: &HeaderMap, uri_scheme: Option<&str>) -> bool {
    header(headers, "x-forwarded-proto")
        .is_some_and(|v| v.split(',').next().is_some_and(|p| p.trim() == "https"))
        || header(headers, "x-forwarded-ssl").is_some_and(|v| v.eq_ignore_ascii_case("on"))
        || uri_scheme == Some("https")
}

/// Hostname (no port) the request was addressed to, honouring
/// `X-Forwarded-Host` over `Host`.
pub fn request_host(headers: &HeaderMap) -> Option<String> {
    let raw = header(headers, "x-forwarded-host")
        .and_then(|v| v.split(',').next())
        .or_else(|| header(headers, "host"))?;
    let raw = raw.trim();
    // Strip :port, but leave IPv6 literals intact.
    let host = if raw.starts_with('[') {
        raw.split(']').next().map(|h| format!("{h}]"))?
    } else {
        raw.split(':').next()?.to_string()
    };
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

/// `scheme://authority` of the externally visible request URL.
pub fn external_origin(headers: &HeaderMap, uri_scheme: Option<&str>) -> Option<String> {
    let scheme = if is_secure(headers, uri_scheme) {
        "https"
    } else {
        "http"
    };
    let authority = header(headers, "x-forwarded-host")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .or_else(|| header(headers, "host"))?;

    let has_port = if authority.starts_with('[') {
        authority.rsplit(']').next().is_some_and(|t| t.starts_with(':'))
    } else {
        authority.contains(':')
    };
    let origin = match header(headers, "x-forwarded-port") {
        Some(port) if !has_port && !is_default_port(scheme, port) => {
            format!("{scheme}://{authority}:{port}")
        }
        _ => format!("{scheme}://{authority}"),
    };
    Some(origin)
}

fn is_default_port(scheme: &str, port: &str) -> bool {
    matches!((scheme, port), ("http", "80") | ("https", "443"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_https_detection() {
        assert!(is_secure(
            &headers(&[("x-forwarded-proto", "https")]),
            None
        ));
        assert!(is_secure(&headers(&[("x-forwarded-ssl", "on")]), None));
        assert!(is_secure(&headers(&[]), Some("https")));
        assert!(!is_secure(&headers(&[("host", "a.example.com")]), None));
        assert!(!is_secure(
            &headers(&[("x-forwarded-proto", "http")]),
            Some("http")
        ));
    }

    #[test]
    fn test_request_host_prefers_forwarded() {
        let h = headers(&[
            ("host", "internal:8080"),
            ("x-forwarded-host", "auth.example.com"),
        ]);
        assert_eq!(request_host(&h).unwrap(), "auth.example.com");
    }

    #[test]
    fn test_request_host_strips_port() {
        let h = headers(&[("host", "Auth.Example.com:3000")]);
        assert_eq!(request_host(&h).unwrap(), "auth.example.com");
    }

    #[test]
    fn test_origin_with_forwarded_port() {
        let h = headers(&[
            ("host", "auth.internal"),
            ("x-forwarded-proto", "https"),
            ("x-forwarded-port", "8443"),
        ]);
        assert_eq!(
            external_origin(&h, None).unwrap(),
            "https://auth.internal:8443"
        );
    }

    #[test]
    fn test_origin_default_port_elided() {
        let h = headers(&[
            ("host", "auth.example.com"),
            ("x-forwarded-proto", "https"),
            ("x-forwarded-port", "443"),
        ]);
        assert_eq!(
            external_origin(&h, None).unwrap(),
            "https://auth.example.com"
        );
    }

    #[test]
    fn test_origin_plain_http() {
        let h = headers(&[("host", "localhost:3000")]);
        assert_eq!(external_origin(&h, None).unwrap(), "http://localhost:3000");
    }
}
