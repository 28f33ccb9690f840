//! Label selectors for choosing which nodes receive the security policy
//!
//! Selectors use the Kubernetes label-selector text syntax: a comma separated
//! list of requirements, all of which must hold for a label set to match.
//!
//! ```text
//! cloud.google.com/gke-nodepool=default-pool,env!=dev,tier in (web,api),!spot
//! ```
//!
//! A selector is parsed once at startup. Parse failures are configuration
//! errors; matching itself never fails.

mod parse;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

pub use parse::{parse, SelectorError};

// ============================================================================
// SBIO: Pure data structures
// ============================================================================

/// Read-only view over a label mapping
pub trait LabelSet {
    fn label(&self, key: &str) -> Option<&str>;
}

impl LabelSet for BTreeMap<String, String> {
    fn label(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }
}

impl LabelSet for HashMap<String, String> {
    fn label(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }
}

/// The comparison a requirement applies to a single label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    /// `key=value` or `key==value`
    Equals(String),
    /// `key!=value`, also satisfied when the label is absent
    NotEquals(String),
    /// `key in (a,b)`
    In(BTreeSet<String>),
    /// `key notin (a,b)`, also satisfied when the label is absent
    NotIn(BTreeSet<String>),
    /// `key`
    Exists,
    /// `!key`
    DoesNotExist,
    /// `key>n`
    GreaterThan(i64),
    /// `key<n`
    LessThan(i64),
}

/// A single clause of a selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
}

impl Requirement {
    pub fn new(key: impl Into<String>, operator: Operator) -> Self {
        Self {
            key: key.into(),
            operator,
        }
    }

    /// Check whether this requirement holds for a label set
    pub fn matches<L: LabelSet + ?Sized>(&self, labels: &L) -> bool {
        let value = labels.label(&self.key);
        match &self.operator {
            Operator::Equals(expected) => value == Some(expected.as_str()),
            Operator::NotEquals(expected) => value != Some(expected.as_str()),
            Operator::In(values) => value.is_some_and(|v| values.contains(v)),
            Operator::NotIn(values) => !value.is_some_and(|v| values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
            Operator::GreaterThan(bound) => parse_integer(value).is_some_and(|n| n > *bound),
            Operator::LessThan(bound) => parse_integer(value).is_some_and(|n| n < *bound),
        }
    }
}

fn parse_integer(value: Option<&str>) -> Option<i64> {
    value.and_then(|v| v.parse::<i64>().ok())
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = &self.key;
        match &self.operator {
            Operator::Equals(v) => write!(f, "{}={}", key, v),
            Operator::NotEquals(v) => write!(f, "{}!={}", key, v),
            Operator::In(values) => write!(f, "{} in ({})", key, join(values)),
            Operator::NotIn(values) => write!(f, "{} notin ({})", key, join(values)),
            Operator::Exists => write!(f, "{}", key),
            Operator::DoesNotExist => write!(f, "!{}", key),
            Operator::GreaterThan(n) => write!(f, "{}>{}", key, n),
            Operator::LessThan(n) => write!(f, "{}<{}", key, n),
        }
    }
}

fn join(values: &BTreeSet<String>) -> String {
    values.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// A parsed, immutable label selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Matches no label set at all
    Nothing,
    /// Matches when every requirement holds; no requirements matches everything
    Requirements(Vec<Requirement>),
}

impl Selector {
    /// A selector that matches every label set
    pub fn everything() -> Self {
        Selector::Requirements(Vec::new())
    }

    /// A selector that matches no label set
    pub fn nothing() -> Self {
        Selector::Nothing
    }

    /// Build a selector from already-validated requirements
    pub fn from_requirements(requirements: Vec<Requirement>) -> Self {
        Selector::Requirements(requirements)
    }

    /// True when the selector places no restriction on labels
    pub fn is_empty(&self) -> bool {
        matches!(self, Selector::Requirements(reqs) if reqs.is_empty())
    }

    pub fn requirements(&self) -> &[Requirement] {
        match self {
            Selector::Nothing => &[],
            Selector::Requirements(reqs) => reqs,
        }
    }

    /// Check whether a label set satisfies every requirement
    pub fn matches<L: LabelSet + ?Sized>(&self, labels: &L) -> bool {
        match self {
            Selector::Nothing => false,
            Selector::Requirements(reqs) => reqs.iter().all(|r| r.matches(labels)),
        }
    }
}

impl Default for Selector {
    fn default() -> Self {
        Selector::everything()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Nothing => write!(f, "<none>"),
            Selector::Requirements(reqs) => {
                let parts: Vec<String> = reqs.iter().map(|r| r.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

impl std::str::FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}
