//! Metric fields and per-function metric bundles.

use serde::{Deserialize, Deserializer, Serialize};

use std::fmt;
use std::str::FromStr;

use crate::CallscopeError;

/// One dimension captured by the profiler for every caller/callee pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    /// Call count.
    Ct,
    /// Wall time in microseconds.
    Wt,
    /// CPU time in microseconds.
    Cpu,
    /// Memory usage in bytes.
    Mu,
    /// Peak memory usage in bytes.
    Pmu,
}

impl MetricField {
    pub const ALL: [MetricField; 5] = [Self::Ct, Self::Wt, Self::Cpu, Self::Mu, Self::Pmu];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ct => "ct",
            Self::Wt => "wt",
            Self::Cpu => "cpu",
            Self::Mu => "mu",
            Self::Pmu => "pmu",
        }
    }

    /// Display unit for absolute values of this metric.
    pub fn unit(self) -> &'static str {
        match self {
            Self::Ct => "calls",
            Self::Wt | Self::Cpu => "µs",
            Self::Mu | Self::Pmu => "bytes",
        }
    }

    /// Whether the self (exclusive) value is derived by subtracting callees.
    /// Call counts are not decomposed.
    pub fn is_exclusive_derived(self) -> bool {
        !matches!(self, Self::Ct)
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricField {
    type Err = CallscopeError;

    /// Accepts `wt`, `ewt` and `self_wt` alike; the scope is dropped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.parse::<MetricKey>()?.field)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricScope {
    Inclusive,
    Exclusive,
}

/// A metric field together with the bundle it is read from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricKey {
    pub field: MetricField,
    pub scope: MetricScope,
}

impl MetricKey {
    pub fn inclusive(field: MetricField) -> Self {
        Self {
            field,
            scope: MetricScope::Inclusive,
        }
    }

    pub fn exclusive(field: MetricField) -> Self {
        Self {
            field,
            scope: MetricScope::Exclusive,
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            MetricScope::Inclusive => write!(f, "{}", self.field),
            MetricScope::Exclusive => write!(f, "e{}", self.field),
        }
    }
}

impl FromStr for MetricKey {
    type Err = CallscopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bare = |name: &str| {
            MetricField::ALL
                .into_iter()
                .find(|field| field.as_str() == name)
        };
        if let Some(field) = bare(trimmed) {
            return Ok(Self::inclusive(field));
        }
        let exclusive = trimmed
            .strip_prefix("self_")
            .or_else(|| trimmed.strip_prefix('e'))
            .and_then(bare);
        match exclusive {
            Some(field) => Ok(Self::exclusive(field)),
            None => Err(CallscopeError::UnknownMetric(s.to_string())),
        }
    }
}

/// Non-negative metric values for one pair or function. Missing fields load as zero.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricBundle {
    #[serde(default, deserialize_with = "non_negative")]
    pub ct: u64,
    #[serde(default, deserialize_with = "non_negative")]
    pub wt: u64,
    #[serde(default, deserialize_with = "non_negative")]
    pub cpu: u64,
    #[serde(default, deserialize_with = "non_negative")]
    pub mu: u64,
    #[serde(default, deserialize_with = "non_negative")]
    pub pmu: u64,
}

impl MetricBundle {
    pub fn get(&self, field: MetricField) -> u64 {
        match field {
            MetricField::Ct => self.ct,
            MetricField::Wt => self.wt,
            MetricField::Cpu => self.cpu,
            MetricField::Mu => self.mu,
            MetricField::Pmu => self.pmu,
        }
    }

    pub fn set(&mut self, field: MetricField, value: u64) {
        match field {
            MetricField::Ct => self.ct = value,
            MetricField::Wt => self.wt = value,
            MetricField::Cpu => self.cpu = value,
            MetricField::Mu => self.mu = value,
            MetricField::Pmu => self.pmu = value,
        }
    }

    pub fn accumulate(&mut self, other: &MetricBundle) {
        for field in MetricField::ALL {
            self.set(field, self.get(field).saturating_add(other.get(field)));
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Int(i64),
    Unsigned(u64),
    Float(f64),
}

// Some profiler builds emit negative memory deltas; those are clamped at load.
fn non_negative<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawNumber::deserialize(deserializer)? {
        RawNumber::Int(v) => v.max(0) as u64,
        RawNumber::Unsigned(v) => v,
        RawNumber::Float(v) if v.is_finite() && v > 0.0 => v.round() as u64,
        RawNumber::Float(_) => 0,
    })
}

/// Signed per-metric difference between two bundles.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricDelta {
    pub ct: i64,
    pub wt: i64,
    pub cpu: i64,
    pub mu: i64,
    pub pmu: i64,
}

impl MetricDelta {
    /// `head - base` for every field.
    pub fn between(base: &MetricBundle, head: &MetricBundle) -> Self {
        let mut out = Self::default();
        for field in MetricField::ALL {
            out.set(field, to_signed(head.get(field)) - to_signed(base.get(field)));
        }
        out
    }

    pub fn added(head: &MetricBundle) -> Self {
        Self::between(&MetricBundle::default(), head)
    }

    pub fn removed(base: &MetricBundle) -> Self {
        Self::between(base, &MetricBundle::default())
    }

    pub fn get(&self, field: MetricField) -> i64 {
        match field {
            MetricField::Ct => self.ct,
            MetricField::Wt => self.wt,
            MetricField::Cpu => self.cpu,
            MetricField::Mu => self.mu,
            MetricField::Pmu => self.pmu,
        }
    }

    fn set(&mut self, field: MetricField, value: i64) {
        match field {
            MetricField::Ct => self.ct = value,
            MetricField::Wt => self.wt = value,
            MetricField::Cpu => self.cpu = value,
            MetricField::Mu => self.mu = value,
            MetricField::Pmu => self.pmu = value,
        }
    }

    pub fn is_zero(&self) -> bool {
        MetricField::ALL.into_iter().all(|field| self.get(field) == 0)
    }
}

fn to_signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_and_exclusive_names() {
        assert_eq!(
            "wt".parse::<MetricKey>().expect("wt"),
            MetricKey::inclusive(MetricField::Wt)
        );
        assert_eq!(
            "ewt".parse::<MetricKey>().expect("ewt"),
            MetricKey::exclusive(MetricField::Wt)
        );
        assert_eq!(
            "self_pmu".parse::<MetricKey>().expect("self_pmu"),
            MetricKey::exclusive(MetricField::Pmu)
        );
        assert_eq!("emu".parse::<MetricField>().expect("emu"), MetricField::Mu);
    }

    #[test]
    fn unknown_metric_is_rejected() {
        let err = "latency".parse::<MetricField>().expect_err("unknown");
        assert!(matches!(err, CallscopeError::UnknownMetric(ref m) if m == "latency"));
        assert!("e".parse::<MetricKey>().is_err());
        assert!("self_".parse::<MetricKey>().is_err());
    }

    #[test]
    fn missing_fields_default_to_zero_and_negatives_clamp() {
        let bundle: MetricBundle =
            serde_json::from_str(r#"{"ct": 2, "wt": 10, "mu": -512}"#).expect("bundle");
        assert_eq!(bundle.ct, 2);
        assert_eq!(bundle.wt, 10);
        assert_eq!(bundle.cpu, 0);
        assert_eq!(bundle.mu, 0);
        assert_eq!(bundle.pmu, 0);
    }

    #[test]
    fn delta_is_signed() {
        let base = MetricBundle {
            wt: 50,
            mu: 10,
            ..Default::default()
        };
        let head = MetricBundle {
            wt: 20,
            mu: 30,
            ..Default::default()
        };
        let delta = MetricDelta::between(&base, &head);
        assert_eq!(delta.wt, -30);
        assert_eq!(delta.mu, 20);
        assert_eq!(MetricDelta::removed(&base).wt, -50);
        assert!(MetricDelta::between(&base, &base).is_zero());
    }
}
