//! Canonical content identity.
//!
//! Pure functions that assign deterministic deduplication identity to raw
//! items: a content hash over normalized title + leading body text, raw
//! URL/GUID hashes, and a normalized-URL equality rule. Identity assignment
//! must never block ingestion, so malformed URLs degrade instead of erroring.

use sha2::{Digest, Sha256};
use url::Url;

use crate::models::ContentIdentifier;

/// How many leading body characters participate in the content hash.
const HASH_BODY_PREFIX_CHARS: usize = 500;

/// Query parameters preserved by [`normalize_url`]; everything else is
/// tracking noise.
const KEPT_QUERY_KEYS: [&str; 2] = ["id", "v"];

/// Maximum length of a title-derived slug.
const SLUG_MAX_CHARS: usize = 80;

/// Compute the canonical content hash: SHA-256 over the lowercased, trimmed
/// title followed by the first 500 characters of the body with all Unicode
/// whitespace stripped and lowercased. Always 64 lowercase hex characters.
pub fn content_hash(title: &str, body: &str) -> String {
    let title_norm = title.trim().to_lowercase();
    let body_norm: String = body
        .chars()
        .take(HASH_BODY_PREFIX_CHARS)
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    let mut hasher = Sha256::new();
    hasher.update(title_norm.as_bytes());
    hasher.update(body_norm.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of a raw string, hex-encoded.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build the full identity record for an item.
///
/// `canonical_id` prefers, in order: the GUID verbatim, the SHA-256 of the
/// normalized URL, a slug derived from the title.
pub fn create_identifier(
    title: &str,
    body: &str,
    url: Option<&str>,
    guid: Option<&str>,
) -> ContentIdentifier {
    let canonical_id = if let Some(g) = guid {
        g.to_string()
    } else if let Some(u) = url {
        sha256_hex(&normalize_url(u))
    } else {
        title_slug(title)
    };

    ContentIdentifier {
        content_hash: content_hash(title, body),
        url: url.map(str::to_string),
        url_hash: url.map(sha256_hex),
        guid: guid.map(str::to_string),
        guid_hash: guid.map(sha256_hex),
        canonical_id,
    }
}

/// Normalize a URL for deduplication. Two URLs refer to the same item iff
/// their normalized forms are byte-equal.
///
/// Rules: lowercase scheme and host, collapse duplicate path slashes, strip
/// a trailing slash unless the path is root, keep only the `id` and `v`
/// query parameters (case-insensitive key, first value wins), drop the
/// fragment, percent-decode the path. Malformed input degrades to a
/// lowercased copy rather than erroring.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(parsed) if parsed.has_host() => normalize_parsed(&parsed),
        _ => trimmed.to_lowercase(),
    }
}

fn normalize_parsed(parsed: &Url) -> String {
    let scheme = parsed.scheme().to_lowercase();
    let host = parsed.host_str().unwrap_or_default().to_lowercase();

    // Collapse duplicate slashes before decoding so a decoded %2F cannot
    // merge path segments.
    let mut path = String::with_capacity(parsed.path().len());
    let mut prev_slash = false;
    for c in parsed.path().chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        path.push(c);
    }
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    let path = percent_decode(&path).to_lowercase();

    // Values are carried raw (still percent-encoded) so an encoded '&' or
    // '=' inside a value cannot turn into a pair separator on re-parse.
    let mut query = String::new();
    let mut seen_keys: Vec<String> = Vec::new();
    for pair in parsed.query().unwrap_or_default().split('&') {
        if pair.is_empty() {
            continue;
        }
        let (raw_key, raw_value) = match pair.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (pair, None),
        };
        let key_lower = percent_decode(raw_key).to_lowercase();
        if !KEPT_QUERY_KEYS.contains(&key_lower.as_str()) {
            continue;
        }
        // First value wins for duplicate keys.
        if seen_keys.contains(&key_lower) {
            continue;
        }
        seen_keys.push(key_lower.clone());
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&key_lower);
        if let Some(value) = raw_value {
            query.push('=');
            query.push_str(value);
        }
    }

    let mut out = format!("{}://{}", scheme, host);
    if let Some(port) = parsed.port() {
        out.push_str(&format!(":{}", port));
    }
    if path != "/" {
        out.push_str(&path);
    }
    if !query.is_empty() {
        out.push('?');
        out.push_str(&query);
    }
    out
}

/// Decode %XX escapes. Invalid escapes pass through untouched.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Derive a filesystem-friendly slug from a title: lowercase alphanumerics
/// with runs of everything else collapsed to single dashes, capped at 80
/// characters.
pub fn title_slug(title: &str) -> String {
    let mut slug = String::new();
    let mut prev_dash = false;
    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            prev_dash = false;
        } else if !prev_dash && !slug.is_empty() {
            slug.push('-');
            prev_dash = true;
        }
        if slug.len() >= SLUG_MAX_CHARS {
            break;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
