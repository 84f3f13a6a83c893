//! Canonical cache keys for tile requests.
//!
//! Tile providers publish interchangeable mirror hosts (load-balancing
//! subdomains, secondary geoservers). A tile fetched through mirror B must be
//! found in the cache when later requested through mirror A, so the cache key
//! collapses every host in a mirror group to the group's first (canonical)
//! host and sorts the query string so parameter order cannot split the cache.

/// Canonicalizes a tile request URL into a cache key.
///
/// Pure function with no failure mode: anything that does not look like a
/// URL is returned unchanged and simply keys on itself.
pub fn normalize(url: &str, mirror_groups: &[Vec<String>]) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let scheme = &url[..scheme_end];
    let rest = &url[scheme_end + 3..];

    let host_end = rest.find(['/', '?']).unwrap_or(rest.len());
    let host = &rest[..host_end];
    let tail = &rest[host_end..];

    let canonical_host = canonical_for(host, mirror_groups);

    let (path, query) = match tail.find('?') {
        Some(q) => (&tail[..q], Some(&tail[q + 1..])),
        None => (tail, None),
    };

    match query {
        Some(q) if !q.is_empty() => {
            let mut pairs: Vec<&str> = q.split('&').collect();
            pairs.sort_unstable();
            format!("{}://{}{}?{}", scheme, canonical_host, path, pairs.join("&"))
        }
        _ => format!("{}://{}{}", scheme, canonical_host, path),
    }
}

fn canonical_for<'a>(host: &'a str, mirror_groups: &'a [Vec<String>]) -> &'a str {
    for group in mirror_groups {
        if group.iter().any(|m| m.eq_ignore_ascii_case(host)) {
            if let Some(first) = group.first() {
                return first;
            }
        }
    }
    host
}

/// Percent-encodes a string for use as a single query-parameter value,
/// e.g. the target URL handed to a CORS relay proxy.
pub fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
