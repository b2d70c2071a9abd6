//! URL construction against the versioned API root.
//!
//! Path segments are pushed one at a time through `Url::path_segments_mut`,
//! so a `/` or `?` inside a caller-supplied identifier is percent-encoded
//! instead of opening a new segment or a query string. Empty and dot
//! segments are dropped: they cannot name a resource and would otherwise
//! yield `//` or walk up the path.

use reqwest::Url;

use crate::error::{ApiError, Result};
use crate::types::PingKind;

pub const DEFAULT_BASE_URL: &str = "https://healthchecks.io/api/v3";

/// Validated root of the versioned API, e.g. `https://healthchecks.io/api/v3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseAddress {
    url: Url,
}

impl BaseAddress {
    pub fn parse(address: &str) -> Result<Self> {
        let url = parse_http_url(address, false)?;
        Ok(Self { url })
    }

    pub fn as_url(&self) -> &Url {
        &self.url
    }

    /// `base/seg1/seg2`
    pub fn join(&self, segments: &[&str]) -> Url {
        append(self.url.clone(), segments, false)
    }

    /// `base/seg1/seg2/`. Collection endpoints only answer on the slashed form.
    pub fn join_dir(&self, segments: &[&str]) -> Url {
        append(self.url.clone(), segments, true)
    }

    pub fn same_origin(&self, other: &Url) -> bool {
        self.url.origin() == other.origin()
    }
}

impl std::fmt::Display for BaseAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Query parameters that are only sent when they carry a value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(&'static str, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key=value` unless `value` is empty.
    pub fn text(mut self, key: &'static str, value: &str) -> Self {
        if !value.is_empty() {
            self.pairs.push((key, value.to_string()));
        }
        self
    }

    /// Adds `key=value` unless `value` is zero or negative.
    pub fn positive(mut self, key: &'static str, value: i64) -> Self {
        if value > 0 {
            self.pairs.push((key, value.to_string()));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn apply(&self, mut url: Url) -> Url {
        if !self.pairs.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in &self.pairs {
                query.append_pair(key, value);
            }
        }
        url
    }
}

/// Resolve the address a ping of `kind` is posted to. A query on the ping
/// URL (`?rid=...`, `?create=1`) is kept after the suffix.
pub fn ping_address(ping_url: &str, kind: PingKind) -> Result<Url> {
    let url = parse_http_url(ping_url, true)?;
    Ok(match kind.suffix() {
        Some(suffix) => append(url, &[suffix], false),
        None => url,
    })
}

fn parse_http_url(address: &str, allow_query: bool) -> Result<Url> {
    let invalid = |reason: &str| ApiError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };
    let url = Url::parse(address).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.cannot_be_a_base() {
        return Err(invalid("not a base URL"));
    }
    if url.fragment().is_some() {
        return Err(invalid("must not carry a fragment"));
    }
    if !allow_query && url.query().is_some() {
        return Err(invalid("must not carry a query"));
    }
    Ok(url)
}

fn append(mut url: Url, segments: &[&str], trailing_slash: bool) -> Url {
    // parse_http_url rejected cannot-be-a-base URLs, so this always yields.
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty();
        for segment in segments {
            if !matches!(*segment, "" | "." | "..") {
                path.push(segment);
            }
        }
        if trailing_slash {
            path.push("");
        }
    }
    url
}
