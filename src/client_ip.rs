//! Best-effort client address behind proxies.

use actix_web::http::header::HeaderMap;

pub const TRUE_CLIENT_IP: &str = "true-client-ip";
pub const X_REAL_IP: &str = "x-real-ip";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_ENVOY_EXTERNAL_ADDRESS: &str = "x-envoy-external-address";

/// Resolves the client address from proxy headers.
///
/// Precedence: `True-Client-IP`, `X-Real-IP`, the first hop of
/// `X-Forwarded-For`, then `X-Envoy-External-Address`. Empty or non-text
/// values are skipped, as is an `X-Forwarded-For` whose first hop is blank.
pub fn client_ip(headers: &HeaderMap) -> Option<&str> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    };

    get(TRUE_CLIENT_IP)
        .or_else(|| get(X_REAL_IP))
        .or_else(|| {
            get(X_FORWARDED_FOR)
                .map(first_hop)
                .filter(|hop| !hop.is_empty())
        })
        .or_else(|| get(X_ENVOY_EXTERNAL_ADDRESS))
}

fn first_hop(xff: &str) -> &str {
    xff.split(',').next().unwrap_or(xff).trim()
}

/// Host part of a `host:port` or `[host]:port` address.
///
/// Addresses without a port give `None`.
pub fn split_host(addr: &str) -> Option<&str> {
    let addr = addr.trim();
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, port) = rest.split_once(']')?;
        return port.strip_prefix(':').map(|_| host);
    }

    let (host, _) = addr.rsplit_once(':')?;
    // a bare IPv6 address has more than one colon and no port
    if host.contains(':') {
        return None;
    }
    Some(host)
}
