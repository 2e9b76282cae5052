//! Utility functions and helpers.

pub mod memory;

use url::Url;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Resolve a URL string against a base URL string.
pub fn resolve(base_url: &str, href: &str) -> Option<String> {
    Url::parse(base_url)
        .ok()
        .map(|base| resolve_url(&base, href))
}

/// Extract the lower-cased host from a URL string, without a `www.` prefix.
pub fn get_domain(url_str: &str) -> Option<String> {
    Url::parse(url_str).ok().and_then(|u| {
        u.host_str()
            .map(|s| s.trim_start_matches("www.").to_lowercase())
    })
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Make a string safe for use inside a file name.
///
/// Keeps ASCII alphanumerics, `-` and `.`; everything else becomes `_`.
/// Runs of `_` are merged and the result is capped at `max_len` chars.
pub fn sanitize_segment(s: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_len));
    let mut last_underscore = false;
    for c in s.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
            c.to_ascii_lowercase()
        } else {
            '_'
        };
        if c == '_' && last_underscore {
            continue;
        }
        last_underscore = c == '_';
        out.push(c);
        if out.len() >= max_len {
            break;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "root".to_string()
    } else {
        trimmed.to_string()
    }
}
