//! Ranked top-N extraction for charting.

use serde::{Deserialize, Serialize};

use crate::{AugmentedProfile, MetricField, MetricKey, sort_nodes};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionEntry {
    pub name: String,
    pub value: u64,
}

/// Top `n` functions by self value of `metric`, descending, symbol ascending on ties.
pub fn extract_dimension(
    profile: &AugmentedProfile,
    metric: MetricField,
    n: usize,
) -> Vec<DimensionEntry> {
    if n == 0 {
        return Vec::new();
    }
    let key = MetricKey::exclusive(metric);
    sort_nodes(profile.nodes().values(), key)
        .into_iter()
        .take(n)
        .map(|node| DimensionEntry {
            name: node.symbol.clone(),
            value: node.exclusive.get(metric),
        })
        .collect()
}
