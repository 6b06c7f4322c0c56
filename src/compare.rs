//! Structural diff of two runs' self metrics.

use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, BTreeSet};

use crate::{AugmentedProfile, CallscopeResult, MetricBundle, MetricDelta, MetricField};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Base,
    Head,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonEntry {
    pub present_in: Presence,
    /// `head.self - base.self`; a missing side counts as all zeros.
    pub delta: MetricDelta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// Root inclusive totals of each run.
    pub base_total: MetricBundle,
    pub head_total: MetricBundle,
    pub total_delta: MetricDelta,
    pub functions: BTreeMap<String, ComparisonEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedChange {
    pub function: String,
    pub present_in: Presence,
    pub delta: i64,
    /// Change relative to the base self value; `None` when the base is zero.
    #[serde(rename = "deltaPct")]
    pub delta_pct: Option<f64>,
}

impl ComparisonResult {
    pub fn get(&self, symbol: &str) -> Option<&ComparisonEntry> {
        self.functions.get(symbol)
    }

    /// Entries ordered by absolute delta of `metric`, largest first.
    pub fn ranked(&self, base: &AugmentedProfile, metric: MetricField) -> Vec<RankedChange> {
        let mut rows: Vec<RankedChange> = self
            .functions
            .iter()
            .map(|(symbol, entry)| {
                let delta = entry.delta.get(metric);
                let before = base.get(symbol).map_or(0, |n| n.exclusive.get(metric));
                let delta_pct = (before > 0).then(|| delta as f64 / before as f64 * 100.0);
                RankedChange {
                    function: symbol.clone(),
                    present_in: entry.present_in,
                    delta,
                    delta_pct,
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            b.delta
                .unsigned_abs()
                .cmp(&a.delta.unsigned_abs())
                .then_with(|| a.function.cmp(&b.function))
        });
        rows
    }
}

pub fn compare(base: &AugmentedProfile, head: &AugmentedProfile) -> CallscopeResult<ComparisonResult> {
    let base_total = base.root()?.inclusive;
    let head_total = head.root()?.inclusive;

    let symbols: BTreeSet<&str> = base
        .nodes()
        .keys()
        .chain(head.nodes().keys())
        .map(String::as_str)
        .collect();

    let functions = symbols
        .into_iter()
        .filter_map(|symbol| {
            let entry = match (base.get(symbol), head.get(symbol)) {
                (Some(b), Some(h)) => ComparisonEntry {
                    present_in: Presence::Both,
                    delta: MetricDelta::between(&b.exclusive, &h.exclusive),
                },
                (None, Some(h)) => ComparisonEntry {
                    present_in: Presence::Head,
                    delta: MetricDelta::added(&h.exclusive),
                },
                (Some(b), None) => ComparisonEntry {
                    present_in: Presence::Base,
                    delta: MetricDelta::removed(&b.exclusive),
                },
                (None, None) => return None,
            };
            Some((symbol.to_string(), entry))
        })
        .collect();

    Ok(ComparisonResult {
        base_total,
        head_total,
        total_delta: MetricDelta::between(&base_total, &head_total),
        functions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FlatProfile, FunctionPairKey, calculate_self};

    fn bundle(wt: u64, mu: u64) -> MetricBundle {
        MetricBundle {
            ct: 1,
            wt,
            mu,
            ..Default::default()
        }
    }

    fn base() -> AugmentedProfile {
        calculate_self(FlatProfile::from_pairs([
            (FunctionPairKey::root(), bundle(100, 1000)),
            (FunctionPairKey::new("main()", "a"), bundle(60, 400)),
            (FunctionPairKey::new("a", "old"), bundle(20, 100)),
        ]))
        .expect("base")
    }

    fn head() -> AugmentedProfile {
        calculate_self(FlatProfile::from_pairs([
            (FunctionPairKey::root(), bundle(150, 900)),
            (FunctionPairKey::new("main()", "a"), bundle(120, 300)),
            (FunctionPairKey::new("a", "new"), bundle(90, 50)),
        ]))
        .expect("head")
    }

    #[test]
    fn self_comparison_is_all_zero() {
        let profile = base();
        let result = compare(&profile, &profile).expect("compare");
        assert_eq!(result.functions.len(), profile.nodes().len());
        for entry in result.functions.values() {
            assert_eq!(entry.present_in, Presence::Both);
            assert!(entry.delta.is_zero());
        }
        assert!(result.total_delta.is_zero());
    }

    #[test]
    fn added_and_removed_carry_full_values() {
        let result = compare(&base(), &head()).expect("compare");
        let added = result.get("new").expect("new");
        assert_eq!(added.present_in, Presence::Head);
        assert_eq!(added.delta.wt, 90);

        let removed = result.get("old").expect("old");
        assert_eq!(removed.present_in, Presence::Base);
        assert_eq!(removed.delta.wt, -20);
        assert_eq!(removed.delta.mu, -100);

        let a = result.get("a").expect("a");
        assert_eq!(a.present_in, Presence::Both);
        assert_eq!(a.delta.wt, 30 - 40);
        assert_eq!(result.total_delta.wt, 50);
        assert_eq!(result.total_delta.mu, -100);
    }

    #[test]
    fn ranked_orders_by_magnitude() {
        let base = base();
        let result = compare(&base, &head()).expect("compare");
        let ranked = result.ranked(&base, MetricField::Wt);
        let order: Vec<_> = ranked.iter().map(|r| (r.function.as_str(), r.delta)).collect();
        assert_eq!(
            order,
            vec![("new", 90), ("old", -20), ("a", -10), ("main()", -10)]
        );
        assert_eq!(ranked[2].delta_pct, Some(-25.0));
        assert_eq!(ranked[0].delta_pct, None);
    }
}
