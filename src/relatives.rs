//! Direct callers and callees of a single symbol.

use serde::{Deserialize, Serialize};

use crate::{
    AugmentedProfile, CallscopeResult, FunctionNode, FunctionPairKey, MetricBundle, MetricField,
    validate_threshold,
};

/// A neighbouring function, annotated with the metrics of the connecting edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeEdge {
    pub symbol: String,
    pub metrics: MetricBundle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relatives {
    pub parents: Vec<RelativeEdge>,
    pub current: FunctionNode,
    pub children: Vec<RelativeEdge>,
}

/// Keep only edges carrying at least `threshold` of the symbol's inclusive `metric`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativeFilter {
    pub metric: MetricField,
    pub threshold: f64,
}

impl RelativeFilter {
    pub fn new(metric: MetricField, threshold: f64) -> CallscopeResult<Self> {
        Ok(Self {
            metric,
            threshold: validate_threshold(threshold)?,
        })
    }

    fn keeps(&self, edge: &MetricBundle, total: u64) -> bool {
        if total == 0 {
            return self.threshold <= 0.0;
        }
        edge.get(self.metric) as f64 / total as f64 >= self.threshold
    }
}

pub fn get_relatives(
    profile: &AugmentedProfile,
    symbol: &str,
    filter: Option<RelativeFilter>,
) -> CallscopeResult<Relatives> {
    let current = profile.require(symbol)?;
    let order_by = filter.map_or(MetricField::Wt, |f| f.metric);

    let collect = |keys: &std::collections::BTreeSet<FunctionPairKey>,
                   endpoint: fn(&FunctionPairKey) -> Option<&str>| {
        let mut edges: Vec<RelativeEdge> = keys
            .iter()
            .filter_map(|key| {
                let symbol = endpoint(key)?;
                let metrics = profile.edge(key);
                let total = current.inclusive.get(order_by);
                if let Some(filter) = filter {
                    if !filter.keeps(&metrics, total) {
                        return None;
                    }
                }
                Some(RelativeEdge {
                    symbol: symbol.to_string(),
                    metrics,
                })
            })
            .collect();
        edges.sort_by(|a, b| {
            b.metrics
                .get(order_by)
                .cmp(&a.metrics.get(order_by))
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        edges
    };

    let parents = collect(&current.callers, |key| key.caller.as_deref());
    let children = collect(&current.callees, |key| Some(key.callee.as_str()));

    Ok(Relatives {
        parents,
        current: current.clone(),
        children,
    })
}
