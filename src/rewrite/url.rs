//! URL classification and broker URL construction

/// Client-facing proxy endpoint
pub const PROXY_PATH: &str = "/api/proxy";

/// Agent-facing relay endpoint
pub const RELAY_PATH: &str = "/api/relay";

/// Navigation prefix mirroring the private service's paths
pub const TUNNEL_PREFIX: &str = "/tunnel";

/// Paths owned by the broker itself; never routed again
pub const RESERVED_PREFIXES: [&str; 3] = [PROXY_PATH, RELAY_PATH, TUNNEL_PREFIX];

/// Whether `url` is root-relative and not already a broker path
pub fn is_rewritable(url: &str) -> bool {
    if !url.starts_with('/') {
        return false;
    }
    // `//host` and `/\host` both resolve to another origin
    if url.starts_with("//") || url.starts_with("/\\") {
        return false;
    }
    !is_reserved(url)
}

/// Whether `url` already points at a broker endpoint
pub fn is_reserved(url: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|prefix| {
        url.strip_prefix(prefix)
            .map(|rest| rest.is_empty() || rest.starts_with(&['/', '?', '#'][..]))
            .unwrap_or(false)
    })
}

/// `/api/proxy?path=<path+query>`, the whole path and query as one value
pub fn proxy_url(path: &str) -> String {
    format!("{}?path={}", PROXY_PATH, encode_path_param(path))
}

/// `/tunnel/<path>`
pub fn tunnel_url(path: &str) -> String {
    format!("{}{}", TUNNEL_PREFIX, path)
}

/// Tunnel URL for a root-relative navigation target (`<a href>`, `Location`)
pub fn tunnel_location(url: &str) -> Option<String> {
    is_rewritable(url).then(|| tunnel_url(url))
}

/// Percent-encode a path for use as a query value, keeping `/` readable
pub fn encode_path_param(path: &str) -> String {
    urlencoding::encode(path).replace("%2F", "/")
}

/// Decode the character references that commonly appear in URL attributes
pub fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
