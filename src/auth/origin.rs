//! Same-origin check on `Origin` / `Referer`.

use http::header::{HOST, ORIGIN, REFERER};
use http::HeaderMap;
use url::Url;

/// Decide whether a request comes from the expected origin.
///
/// The expected `host[:port]` is taken from `allowed_origin` when configured,
/// otherwise from the request's `Host` header. `localhost` and `127.0.0.1` are
/// treated as the same host. A request that carries neither `Origin` nor
/// `Referer` is considered same-origin.
pub fn same_origin(headers: &HeaderMap, allowed_origin: Option<&str>) -> bool {
    let origin = header_str(headers, ORIGIN.as_str());
    let referer = header_str(headers, REFERER.as_str());

    if origin.is_none() && referer.is_none() {
        return true;
    }

    let expected = match allowed_origin {
        Some(allowed) => match authority(allowed) {
            Some(authority) => authority,
            None => return false,
        },
        None => match header_str(headers, HOST.as_str()) {
            Some(host) => host.to_ascii_lowercase(),
            None => return false,
        },
    };
    let accepted = with_loopback_alias(expected);

    [origin, referer]
        .into_iter()
        .flatten()
        .filter_map(authority)
        .any(|candidate| accepted.contains(&candidate))
}

/// Lowercased `host[:port]` of an absolute URL, with the port only when explicit.
fn authority(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

fn with_loopback_alias(expected: String) -> Vec<String> {
    let alias = if let Some(rest) = expected.strip_prefix("localhost:") {
        Some(format!("127.0.0.1:{}", rest))
    } else {
        expected
            .strip_prefix("127.0.0.1:")
            .map(|rest| format!("localhost:{}", rest))
    };
    let mut accepted = vec![expected];
    accepted.extend(alias);
    accepted
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
