//! Pure sanitization and validation functions (§6). No I/O, no state —
//! every function here is idempotent: `sanitize(sanitize(x)) == sanitize(x)`.

use std::net::IpAddr;
use url::Url;

const MIN_BUCKET_LEN: usize = 3;
const MAX_BUCKET_LEN: usize = 63;
const BLOCKED_PORTS: [u16; 4] = [22, 23, 25, 3389];

/// Lowercase; `[^a-z0-9.-] → -`; collapse repeats; trim leading/trailing
/// `.-`; pad to `MIN_BUCKET_LEN`; cap to `MAX_BUCKET_LEN`.
pub fn sanitize_bucket_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut mapped = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
            mapped.push(c);
        } else {
            mapped.push('-');
        }
    }

    let mut collapsed = String::with_capacity(mapped.len());
    let mut prev: Option<char> = None;
    for c in mapped.chars() {
        if Some(c) == prev && (c == '-' || c == '.') {
            continue;
        }
        collapsed.push(c);
        prev = Some(c);
    }

    let trimmed = collapsed.trim_matches(|c| c == '.' || c == '-').to_string();

    let mut result = if trimmed.is_empty() {
        "x".repeat(MIN_BUCKET_LEN)
    } else {
        trimmed
    };

    while result.len() < MIN_BUCKET_LEN {
        result.push('x');
    }
    if result.len() > MAX_BUCKET_LEN {
        result.truncate(MAX_BUCKET_LEN);
        result = result.trim_end_matches(|c| c == '.' || c == '-').to_string();
        while result.len() < MIN_BUCKET_LEN {
            result.push('x');
        }
    }

    result
}

/// `[^A-Za-z0-9_] → _`; prepend `_` if the result starts with a digit;
/// collapse repeated `_`.
pub fn sanitize_collection_name(name: &str) -> String {
    let mut mapped = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            mapped.push(c);
        } else {
            mapped.push('_');
        }
    }

    let mut collapsed = String::with_capacity(mapped.len());
    let mut prev_underscore = false;
    for c in mapped.chars() {
        if c == '_' && prev_underscore {
            continue;
        }
        prev_underscore = c == '_';
        collapsed.push(c);
    }

    if collapsed.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        collapsed.insert(0, '_');
    }
    if collapsed.is_empty() {
        collapsed.push('_');
    }

    collapsed
}

/// Reject empty; strip null bytes; drop `.`, `..`, drive-letter, and
/// absolute-path components; rejoin remaining components with `/`.
pub fn sanitize_filename(path: &str) -> Result<String, String> {
    if path.is_empty() {
        return Err("filename must not be empty".to_string());
    }
    let cleaned: String = path.chars().filter(|&c| c != '\0').collect();

    let parts: Vec<&str> = cleaned
        .split(['/', '\\'])
        .filter(|component| {
            if component.is_empty() || *component == "." || *component == ".." {
                return false;
            }
            // drive-letter component, e.g. "C:"
            if component.len() == 2
                && component.as_bytes()[1] == b':'
                && component.as_bytes()[0].is_ascii_alphabetic()
            {
                return false;
            }
            true
        })
        .collect();

    if parts.is_empty() {
        return Err(format!("path '{}' has no valid components", path));
    }

    Ok(parts.join("/"))
}

/// URL admission policy for the scraping subsystem (§6): http/https only,
/// no loopback/private/link-local/reserved/multicast targets, and a
/// blocked-port list. Resolves the host to guard against DNS rebinding —
/// a hostname that currently resolves to a public IP is re-checked by the
/// fetcher at connect time, but this function validates syntactically and
/// against any IP literal present in the URL itself.
pub fn validate_scrape_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid URL: {e}"))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme: {other}")),
    }

    let port = url
        .port_or_known_default()
        .ok_or_else(|| "URL has no resolvable port".to_string())?;
    if BLOCKED_PORTS.contains(&port) {
        return Err(format!("port {port} is blocked"));
    }

    let host = url.host_str().ok_or_else(|| "URL has no host".to_string())?;
    if host.eq_ignore_ascii_case("localhost") {
        return Err("localhost is not admissible".to_string());
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        reject_disallowed_ip(ip)?;
    }

    Ok(url)
}

fn reject_disallowed_ip(ip: IpAddr) -> Result<(), String> {
    let disallowed = match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.is_documentation()
                || is_reserved_v4(&v4)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_multicast() || v6.is_unspecified() || is_unique_local(&v6)
        }
    };
    if disallowed {
        Err(format!("IP {ip} is not admissible"))
    } else {
        Ok(())
    }
}

/// IANA-reserved ranges the standard library's `Ipv4Addr` helpers don't
/// already cover: 0.0.0.0/8 ("this network"), 100.64.0.0/10
/// (carrier-grade NAT, RFC 6598), 192.0.0.0/24 (IETF protocol
/// assignments), 198.18.0.0/15 (benchmarking, RFC 2544), and 240.0.0.0/4
/// (Class E / future use).
fn is_reserved_v4(v4: &std::net::Ipv4Addr) -> bool {
    let o = v4.octets();
    o[0] == 0
        || (o[0] == 100 && (o[1] & 0xc0) == 0x40)
        || (o[0] == 192 && o[1] == 0 && o[2] == 0)
        || (o[0] == 198 && (o[1] & 0xfe) == 18)
        || o[0] >= 240
}

fn is_unique_local(v6: &std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}
