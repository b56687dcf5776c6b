//! Label matchers. Expression parsing lives with the caller; the index only evaluates predicates.

use std::fmt;
use std::sync::Arc;

/// Predicate over a label value, e.g. a compiled regular expression supplied by the caller.
pub trait ValuePredicate: Send + Sync {
    fn matches(&self, value: &str) -> bool;
}

impl<F> ValuePredicate for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn matches(&self, value: &str) -> bool {
        self(value)
    }
}

#[derive(Clone)]
pub enum MatchOp {
    Equal(String),
    NotEqual(String),
    /// Any value present under the label name.
    Any,
    Predicate(Arc<dyn ValuePredicate>),
}

impl fmt::Debug for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchOp::Equal(v) => write!(f, "={:?}", v),
            MatchOp::NotEqual(v) => write!(f, "!={:?}", v),
            MatchOp::Any => write!(f, "=~.+"),
            MatchOp::Predicate(_) => write!(f, "=~<predicate>"),
        }
    }
}

/// A predicate on one label. A matcher set is their conjunction.
#[derive(Debug, Clone)]
pub struct LabelMatcher {
    pub name: String,
    pub op: MatchOp,
}

/// Conjunction of matchers.
pub type LabelMatcherSet = Vec<LabelMatcher>;

impl LabelMatcher {
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::Equal(value.into()),
        }
    }

    pub fn not_equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::NotEqual(value.into()),
        }
    }

    pub fn any(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::Any,
        }
    }

    pub fn predicate(name: impl Into<String>, predicate: impl ValuePredicate + 'static) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::Predicate(Arc::new(predicate)),
        }
    }

    /// The value to look up directly when this is an equality matcher.
    pub fn exact_value(&self) -> Option<&str> {
        match &self.op {
            MatchOp::Equal(v) => Some(v),
            _ => None,
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match &self.op {
            MatchOp::Equal(v) => v == value,
            MatchOp::NotEqual(v) => v != value,
            MatchOp::Any => true,
            MatchOp::Predicate(p) => p.matches(value),
        }
    }
}
