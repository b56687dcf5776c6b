//! Label model: canonical label sets, content-addressed series ids and the persisted token format.

use crate::types::SeriesId;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashSet;

/// Reserved label carrying the metric name. Appended once per row during ingest.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Separator between `name=value` pairs in the serialized label list.
pub const LABEL_SEP: &str = ":/:";

const HASH_SEP: u8 = 0xFF;

thread_local! {
    static HASH_SCRATCH: RefCell<Vec<u8>> = RefCell::new(Vec::with_capacity(1024));
}

/// Builds the `name=value` token keyed by the inverted indexes.
pub fn token(name: &str, value: &str) -> String {
    let mut t = String::with_capacity(name.len() + value.len() + 1);
    t.push_str(name);
    t.push('=');
    t.push_str(value);
    t
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// A label is valid when both name and value are non-empty and the name has no `=`, which
    /// the `name=value` token could not represent.
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.value.is_empty() && !self.name.contains('=')
    }

    /// Inverted-index token: `name=value`.
    pub fn token(&self) -> String {
        token(&self.name, &self.value)
    }

    /// Parses a `name=value` token, splitting on the first `=`.
    pub fn parse_token(token: &str) -> Option<Label> {
        let (name, value) = token.split_once('=')?;
        Some(Label::new(name, value))
    }
}

/// Ordered collection of labels.
///
/// The order is the caller's until [`LabelSet::series_id`] sorts a private copy; canonicalization
/// only filters and deduplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(Vec<Label>);

impl LabelSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Builds a label set from `(name, value)` pairs, keeping the given order.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        pairs.iter().map(|(n, v)| Label::new(*n, *v)).collect()
    }

    pub fn push(&mut self, label: Label) {
        self.0.push(label);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Label] {
        &self.0
    }

    /// Value of the first label with this name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    /// Drops invalid labels (see [`Label::is_valid`]) and deduplicates by name, first occurrence
    /// wins.
    /// Order of the surviving labels is preserved.
    pub fn canonicalize(self) -> LabelSet {
        let mut seen: HashSet<String> = HashSet::with_capacity(self.0.len());
        let mut out = Vec::with_capacity(self.0.len());
        for label in self.0 {
            // A name is claimed by its first occurrence even if that occurrence is invalid.
            let first = seen.insert(label.name.clone());
            if first && label.is_valid() {
                out.push(label);
            }
        }
        LabelSet(out)
    }

    /// Canonicalizes, then appends the metric-name label. Any caller-supplied metric-name label
    /// is discarded so the appended one is the only one.
    pub fn with_metric_name(self, metric: &str) -> LabelSet {
        let mut labels = self.canonicalize();
        labels.0.retain(|l| l.name != METRIC_NAME_LABEL);
        labels.0.push(Label::new(METRIC_NAME_LABEL, metric));
        labels
    }

    /// Deterministic 64-bit content hash, independent of label order.
    pub fn series_id(&self) -> SeriesId {
        let mut sorted: Vec<&Label> = self.0.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.value.cmp(&b.value)));

        HASH_SCRATCH.with(|scratch| {
            let mut buf = scratch.borrow_mut();
            buf.clear();
            for l in sorted {
                buf.extend_from_slice(l.name.as_bytes());
                buf.push(HASH_SEP);
                buf.extend_from_slice(l.value.as_bytes());
                buf.push(HASH_SEP);
            }
            xxhash_rust::xxh64::xxh64(&buf, 0)
        })
    }

    /// `name=value` pairs, each followed by [`LABEL_SEP`].
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for l in &self.0 {
            out.extend_from_slice(l.name.as_bytes());
            out.push(b'=');
            out.extend_from_slice(l.value.as_bytes());
            out.extend_from_slice(LABEL_SEP.as_bytes());
        }
        out
    }

    /// Inverse of [`LabelSet::to_bytes`]. Pairs without `=` are skipped.
    pub fn from_bytes(bytes: &[u8]) -> LabelSet {
        let s = String::from_utf8_lossy(bytes);
        s.split(LABEL_SEP).filter_map(Label::parse_token).collect()
    }
}

impl FromIterator<Label> for LabelSet {
    fn from_iter<I: IntoIterator<Item = Label>>(iter: I) -> Self {
        LabelSet(iter.into_iter().collect())
    }
}

impl From<Vec<Label>> for LabelSet {
    fn from(labels: Vec<Label>) -> Self {
        LabelSet(labels)
    }
}

impl IntoIterator for LabelSet {
    type Item = Label;
    type IntoIter = std::vec::IntoIter<Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a LabelSet {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
