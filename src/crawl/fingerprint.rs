// src/crawl/fingerprint.rs
// =============================================================================
// Request identity and duplicate suppression.
//
// A fingerprint is the canonical form of a job's target:
// - the URL with scheme and host lower-cased, default port and fragment
//   dropped, query pairs sorted
// - followed by the payload as JSON with object keys sorted
//
// Two jobs with equal fingerprints are the same logical job. Once a
// fingerprint is admitted it stays blocked for the life of the engine; there
// is no eviction.
// =============================================================================

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(target: &str, payload: Option<&Value>) -> Self {
        let mut key = canonical_target(target);
        if let Some(payload) = payload {
            key.push(' ');
            write_canonical_json(payload, &mut key);
        }
        Fingerprint(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical form of a target. Anything that does not parse as an absolute
/// URL is used as trimmed text.
pub fn canonical_target(target: &str) -> String {
    let trimmed = target.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(&pairs);
    }

    url.to_string()
}

// serde_json's map order depends on crate features, so keys are sorted here.
fn write_canonical_json(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical_json(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_json(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Tracks admitted fingerprints.
#[derive(Debug)]
pub struct Deduplicator {
    enabled: bool,
    seen: HashSet<Fingerprint>,
}

impl Deduplicator {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            seen: HashSet::new(),
        }
    }

    /// Returns false when deduplication is on and `fingerprint` was admitted
    /// before. Admitting records the fingerprint.
    pub fn should_admit(&mut self, fingerprint: &Fingerprint) -> bool {
        if !self.enabled {
            return true;
        }
        self.seen.insert(fingerprint.clone())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of fingerprints recorded so far.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
