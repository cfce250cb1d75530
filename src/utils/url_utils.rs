//! URL normalization and result fingerprints.
//!
//! Two submissions that differ only in fragment, query-parameter order,
//! host case, default port or a trailing slash map to the same fingerprint,
//! so they share one cache entry.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use xxhash_rust::xxh3::xxh3_128;

use crate::errors::EngineError;
use crate::task_engine::task_types::ParseOptions;

/// Deterministic cache key: hash of the normalized URL and the sorted
/// parse-option set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse and normalize a target URL
///
/// Only absolute `http`/`https` URLs with a host are accepted. The fragment
/// is dropped, query pairs are sorted and a trailing slash on a non-root
/// path is removed. Host lowercasing and default-port removal come from the
/// `url` crate's own serialization.
///
/// # Errors
/// Returns `EngineError::Validation` for malformed URLs or unsupported schemes.
pub fn normalize_url(raw: &str) -> Result<Url, EngineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation("url is empty".to_string()));
    }

    let mut url = Url::parse(trimmed)
        .map_err(|e| EngineError::Validation(format!("malformed url '{trimmed}': {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(EngineError::Validation(format!(
                "unsupported url scheme '{other}' (expected http or https)"
            )));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(EngineError::Validation(format!("url has no host: {trimmed}")));
    }

    url.set_fragment(None);

    if url.query().is_some() {
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            pairs.sort();
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    log::trace!("Normalized url {trimmed} -> {url}");
    Ok(url)
}

/// Compute the cache fingerprint for a normalized URL and its options
///
/// `force_refresh` is a request behaviour, not a property of the result,
/// so it does not take part in the fingerprint: a forced refresh overwrites
/// the same entry a normal request would read.
#[must_use]
pub fn fingerprint(normalized: &Url, options: &ParseOptions) -> Fingerprint {
    let mut option_set = [
        ("include_metadata", options.include_metadata),
        ("wait_for_dynamic_content", options.wait_for_dynamic_content),
    ];
    option_set.sort_by_key(|(name, _)| *name);

    let mut material = String::with_capacity(normalized.as_str().len() + 64);
    material.push_str(normalized.as_str());
    for (name, enabled) in option_set {
        material.push('\n');
        material.push_str(name);
        material.push('=');
        material.push(if enabled { '1' } else { '0' });
    }

    Fingerprint(format!("{:032x}", xxh3_128(material.as_bytes())))
}
