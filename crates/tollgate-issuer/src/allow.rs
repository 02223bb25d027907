//! Default client allow check: redirect hosts must share the effective
//! registrable domain with the request host.

use tracing::debug;
use url::Url;

use axum::http::HeaderMap;

use crate::request::request_host;

/// Two-part public suffixes where the registrable domain is TLD+2.
///
/// Deliberately a short, common list rather than the full public-suffix
/// database; deployments with exotic domains supply their own allow check.
const TWO_PART_TLDS: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "me.uk", "net.uk",
    "com.au", "net.au", "org.au", "edu.au", "gov.au",
    "co.nz", "net.nz", "org.nz",
    "co.jp", "ne.jp", "or.jp", "ac.jp", "go.jp",
    "co.kr", "or.kr",
    "com.br", "net.br", "org.br",
    "com.cn", "net.cn", "org.cn",
    "com.mx", "com.ar", "com.tr", "com.sg", "com.hk", "com.tw",
    "co.in", "net.in", "org.in",
    "co.za", "org.za",
];

/// Inputs to the allow decision.
#[derive(Debug, Clone)]
pub struct AllowRequest {
    #[allow(missing_docs)]
    pub client_id: String,
    /// The requested redirect target
    pub redirect_uri: String,
    #[allow(missing_docs)]
    pub audience: Option<String>,
    /// Hostname the issuer request arrived at (proxy-aware)
    pub request_host: Option<String>,
}

impl AllowRequest {
    /// Assemble from `/authorize` parameters and request headers.
    pub fn new(
        client_id: &str,
        redirect_uri: &str,
        audience: Option<&str>,
        headers: &HeaderMap,
    ) -> Self {
        Self {
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            audience: audience.map(String::from),
            request_host: request_host(headers),
        }
    }
}

/// The registrable domain: last two labels, or three when the suffix is a
/// known two-part TLD (`api.example.co.uk` -> `example.co.uk`).
pub fn effective_domain(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }
    let last_two = labels[labels.len() - 2..].join(".");
    let keep = if TWO_PART_TLDS.contains(&last_two.as_str()) {
        3
    } else {
        2
    };
    if labels.len() <= keep {
        host
    } else {
        labels[labels.len() - keep..].join(".")
    }
}

/// Default allow check used when the host supplies none.
///
/// Loopback redirects are always permitted; otherwise the redirect host
/// must share the effective domain with the (proxy-aware) request host.
pub fn default_allow(request: &AllowRequest) -> bool {
    let Some(redirect_host) = Url::parse(&request.redirect_uri)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    else {
        return false;
    };

    if redirect_host == "localhost" || redirect_host == "127.0.0.1" {
        return true;
    }

    let Some(request_host) = request.request_host.as_deref() else {
        return false;
    };
    let allowed = effective_domain(&redirect_host) == effective_domain(request_host);
    if !allowed {
        debug!(
            client_id = %request.client_id,
            redirect_host = %redirect_host,
            request_host = %request_host,
            "default allow check rejected redirect"
        );
    }
    allowed
}
