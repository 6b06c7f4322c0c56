//! Flat caller/callee profile as captured by the instrumenting profiler.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt;

use crate::{CallscopeError, CallscopeResult, MetricBundle};

/// Symbol of the synthetic root entry.
pub const ROOT_SYMBOL: &str = "main()";

const PAIR_SEPARATOR: &str = "==>";

/// One edge of the raw profile. A `None` caller marks a top-level entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FunctionPairKey {
    pub caller: Option<String>,
    pub callee: String,
}

impl FunctionPairKey {
    pub fn new(caller: impl Into<String>, callee: impl Into<String>) -> Self {
        Self {
            caller: Some(caller.into()),
            callee: callee.into(),
        }
    }

    pub fn top_level(callee: impl Into<String>) -> Self {
        Self {
            caller: None,
            callee: callee.into(),
        }
    }

    pub fn root() -> Self {
        Self::top_level(ROOT_SYMBOL)
    }

    pub fn is_root(&self) -> bool {
        self.caller.is_none() && self.callee == ROOT_SYMBOL
    }

    /// A function calling itself directly (`f==>f`).
    pub fn is_self_call(&self) -> bool {
        self.caller.as_deref() == Some(self.callee.as_str())
    }

    /// Parse the profiler's `caller==>callee` key notation.
    pub fn parse(raw: &str) -> CallscopeResult<Self> {
        match raw.split_once(PAIR_SEPARATOR) {
            None if raw.is_empty() => Err(CallscopeError::MalformedProfile(
                "empty function key".to_string(),
            )),
            None => Ok(Self::top_level(raw)),
            Some((caller, callee)) if caller.is_empty() || callee.is_empty() => Err(
                CallscopeError::MalformedProfile(format!("incomplete pair key {raw:?}")),
            ),
            Some((caller, callee)) => Ok(Self::new(caller, callee)),
        }
    }
}

impl fmt::Display for FunctionPairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.caller {
            Some(caller) => write!(f, "{caller}{PAIR_SEPARATOR}{}", self.callee),
            None => f.write_str(&self.callee),
        }
    }
}

/// Per-pair metric table for one run. Serialized in the profiler's native
/// object form: `{"main()": {...}, "main()==>a": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, MetricBundle>",
    into = "BTreeMap<String, MetricBundle>"
)]
pub struct FlatProfile {
    pairs: BTreeMap<FunctionPairKey, MetricBundle>,
}

impl FlatProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (FunctionPairKey, MetricBundle)>) -> Self {
        let mut out = Self::new();
        for (key, metrics) in pairs {
            out.insert(key, metrics);
        }
        out
    }

    /// Insert a pair row; a repeated key accumulates into the existing row.
    pub fn insert(&mut self, key: FunctionPairKey, metrics: MetricBundle) {
        self.pairs
            .entry(key)
            .and_modify(|existing| existing.accumulate(&metrics))
            .or_insert(metrics);
    }

    pub fn get(&self, key: &FunctionPairKey) -> Option<&MetricBundle> {
        self.pairs.get(key)
    }

    pub fn root(&self) -> Option<&MetricBundle> {
        self.pairs.get(&FunctionPairKey::root())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FunctionPairKey, &MetricBundle)> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn from_json_str(raw: &str) -> CallscopeResult<Self> {
        let map: BTreeMap<String, MetricBundle> = serde_json::from_str(raw)?;
        Self::try_from(map)
    }
}

impl TryFrom<BTreeMap<String, MetricBundle>> for FlatProfile {
    type Error = CallscopeError;

    fn try_from(raw: BTreeMap<String, MetricBundle>) -> Result<Self, Self::Error> {
        let mut out = Self::new();
        for (key, metrics) in raw {
            out.insert(FunctionPairKey::parse(&key)?, metrics);
        }
        Ok(out)
    }
}

impl From<FlatProfile> for BTreeMap<String, MetricBundle> {
    fn from(profile: FlatProfile) -> Self {
        profile
            .pairs
            .into_iter()
            .map(|(key, metrics)| (key.to_string(), metrics))
            .collect()
    }
}
