//! Label indexes: the mutable inverted index built during ingestion and the read-only index
//! rehydrated from persisted metadata. Both resolve matcher sets through [`LabelIndex`].
//!
//! Postings are Roaring bitmaps: `RoaringTreemap` over 64-bit series ids in memory,
//! `RoaringBitmap` over dense 32-bit ordinals on disk. Both give cheap AND/OR across tokens.

use crate::labels::{token, Label, LabelSet};
use crate::matcher::LabelMatcher;
use crate::meta::MetaLabel;
use crate::types::{Ordinal, SeriesId};

use dashmap::DashMap;
use roaring::{RoaringBitmap, RoaringTreemap};
use std::collections::{BTreeSet, HashMap};

/// Label name -> distinct values observed in a segment.
#[derive(Debug, Default)]
pub struct LabelValueSet {
    values: DashMap<String, BTreeSet<String>>,
}

impl LabelValueSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: &str, value: &str) {
        if let Some(mut set) = self.values.get_mut(name) {
            if !set.contains(value) {
                set.insert(value.to_string());
            }
            return;
        }
        self.values
            .entry(name.to_string())
            .or_default()
            .insert(value.to_string());
    }

    /// Sorted values for `name`; empty if the name is unknown.
    pub fn values(&self, name: &str) -> Vec<String> {
        self.values
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Sorted label names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// Set operations the matcher resolution needs from a postings type.
pub trait Postings: Default + Clone {
    fn union_with(&mut self, other: &Self);
    fn intersect_with(&mut self, other: &Self);
    fn is_empty(&self) -> bool;
}

impl Postings for RoaringBitmap {
    fn union_with(&mut self, other: &Self) {
        *self |= other;
    }
    fn intersect_with(&mut self, other: &Self) {
        *self &= other;
    }
    fn is_empty(&self) -> bool {
        RoaringBitmap::is_empty(self)
    }
}

impl Postings for RoaringTreemap {
    fn union_with(&mut self, other: &Self) {
        *self |= other;
    }
    fn intersect_with(&mut self, other: &Self) {
        *self &= other;
    }
    fn is_empty(&self) -> bool {
        RoaringTreemap::is_empty(self)
    }
}

/// Shared contract of the two index variants.
pub trait LabelIndex {
    type Postings: Postings;

    /// Postings for a `name=value` token, if the token is known.
    fn postings(&self, token: &str) -> Option<Self::Postings>;

    /// Resolves a conjunction of matchers.
    ///
    /// Equality matchers are a direct token lookup; every other predicate scans the values
    /// known under its label name and unions their postings. Results are intersected across
    /// matchers. An empty matcher set, or any matcher without candidates, yields an empty set.
    fn match_postings(&self, values: &LabelValueSet, matchers: &[LabelMatcher]) -> Self::Postings {
        let mut acc: Option<Self::Postings> = None;
        for m in matchers {
            let candidates = match m.exact_value() {
                Some(v) => self.postings(&token(&m.name, v)).unwrap_or_default(),
                None => {
                    let mut union = Self::Postings::default();
                    for v in values.values(&m.name) {
                        if !m.matches(&v) {
                            continue;
                        }
                        if let Some(p) = self.postings(&token(&m.name, &v)) {
                            union.union_with(&p);
                        }
                    }
                    union
                }
            };
            if candidates.is_empty() {
                return Self::Postings::default();
            }
            acc = Some(match acc {
                None => candidates,
                Some(mut a) => {
                    a.intersect_with(&candidates);
                    if a.is_empty() {
                        return a;
                    }
                    a
                }
            });
        }
        acc.unwrap_or_default()
    }
}

/// Inverted index updated incrementally as series are created.
///
/// Each token's id set lives in its own map entry, so concurrent updates for different series
/// that share tokens serialize on the entry's shard only.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    postings: DashMap<String, RoaringTreemap>,
    labels: DashMap<SeriesId, LabelSet>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes every label of a series. Idempotent per `(id, labels)`.
    pub fn update(&self, id: SeriesId, labels: &LabelSet) {
        for l in labels {
            self.postings.entry(l.token()).or_default().insert(id);
        }
        self.labels.entry(id).or_insert_with(|| labels.clone());
    }

    /// Sorted series ids matching the conjunction.
    pub fn match_sids(&self, values: &LabelValueSet, matchers: &[LabelMatcher]) -> Vec<SeriesId> {
        self.match_postings(values, matchers).iter().collect()
    }

    /// Label sets for the given series ids, skipping unknown ids.
    pub fn match_labels(&self, ids: &[SeriesId]) -> Vec<LabelSet> {
        ids.iter()
            .filter_map(|id| self.labels.get(id).map(|l| l.clone()))
            .collect()
    }

    /// Point-in-time copy of the token table, sorted by token.
    pub fn snapshot(&self) -> Vec<(String, Vec<SeriesId>)> {
        let mut out: Vec<(String, Vec<SeriesId>)> = self
            .postings
            .iter()
            .map(|e| (e.key().clone(), e.value().iter().collect()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl LabelIndex for MemoryIndex {
    type Postings = RoaringTreemap;

    fn postings(&self, token: &str) -> Option<RoaringTreemap> {
        self.postings.get(token).map(|p| p.clone())
    }
}

/// Read-only index rebuilt once from a segment's metadata.
#[derive(Debug, Default)]
pub struct DiskIndex {
    /// Parsed label per token ordinal; `None` for malformed tokens.
    labels: Vec<Option<Label>>,
    postings: HashMap<String, RoaringBitmap>,
    skipped: usize,
}

impl DiskIndex {
    /// Builds the index from the metadata token table. Malformed tokens (no `=`, empty name or
    /// value) are skipped and counted, never fatal.
    pub fn build(table: &[MetaLabel]) -> Self {
        let mut labels = Vec::with_capacity(table.len());
        let mut postings = HashMap::with_capacity(table.len());
        let mut skipped = 0usize;
        for entry in table {
            match Label::parse_token(&entry.token).filter(Label::is_valid) {
                Some(label) => {
                    let bitmap: RoaringBitmap = entry.ordinals.iter().copied().collect();
                    postings.insert(entry.token.clone(), bitmap);
                    labels.push(Some(label));
                }
                None => {
                    skipped += 1;
                    labels.push(None);
                }
            }
        }
        Self {
            labels,
            postings,
            skipped,
        }
    }

    /// Every well-formed label in token order.
    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter().flatten()
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Sorted series ordinals matching the conjunction.
    pub fn match_sids(&self, values: &LabelValueSet, matchers: &[LabelMatcher]) -> Vec<Ordinal> {
        self.match_postings(values, matchers).iter().collect()
    }

    /// Resolves a series' token ordinals back to its label set.
    pub fn match_labels(&self, token_ordinals: &[u32]) -> LabelSet {
        token_ordinals
            .iter()
            .filter_map(|&i| self.labels.get(i as usize).and_then(|l| l.clone()))
            .collect()
    }
}

impl LabelIndex for DiskIndex {
    type Postings = RoaringBitmap;

    fn postings(&self, token: &str) -> Option<RoaringBitmap> {
        self.postings.get(token).cloned()
    }
}
