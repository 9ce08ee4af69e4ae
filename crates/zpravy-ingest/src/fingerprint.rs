//! URL normalisation and article fingerprints.
//!
//! Two records are the same article when their normalised URLs are equal:
//! scheme and host lowercased, default port dropped, fragment dropped,
//! trailing slash stripped from the path and tracking parameters removed from
//! the query. Remaining query parameters keep their original order.

use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Query parameters that never identify content.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid", "yclid", "_ga", "ref",
    "ref_src",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("unparseable url: {0}")]
    Parse(#[from] url::ParseError),

    #[error("unsupported scheme: {0}")]
    Scheme(String),

    #[error("url has no host")]
    MissingHost,
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Parse `raw` and reduce it to its canonical form.
pub fn normalize_url(raw: &str) -> Result<Url, UrlError> {
    // `Url::parse` already lowercases scheme and host and drops the default
    // port for http(s).
    let mut url = Url::parse(raw.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlError::Scheme(other.to_string())),
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(UrlError::MissingHost);
    }

    url.set_fragment(None);

    let kept: Option<String> = url.query().map(|q| {
        q.split('&')
            .filter(|pair| !pair.is_empty())
            .filter(|pair| {
                let key = pair.split('=').next().unwrap_or_default();
                !is_tracking_param(key)
            })
            .collect::<Vec<_>>()
            .join("&")
    });
    match kept {
        Some(q) if !q.is_empty() => url.set_query(Some(&q)),
        _ => url.set_query(None),
    }

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        let trimmed = if trimmed.is_empty() { "/" } else { trimmed }.to_string();
        url.set_path(&trimmed);
    }

    Ok(url)
}

/// SHA-256 hex digest of an already-normalised URL.
pub fn fingerprint(normalized: &Url) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_str().as_bytes());
    hex::encode(hasher.finalize())
}
