//! Exclusive ("self") metrics and the augmented profile built from them.

use serde::{Deserialize, Serialize};

use crate::{
    CallscopeError, CallscopeResult, FlatProfile, FunctionNode, FunctionNodes, MetricBundle,
    MetricField, ROOT_SYMBOL, build_tree, find_cycles,
};

/// A non-fatal anomaly found while deriving self metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityWarning {
    /// Callee edges summed to more than the function's inclusive value.
    NegativeSelfClamped {
        symbol: String,
        metric: MetricField,
        inclusive: u64,
        callees: u64,
    },
    /// A function calls itself directly.
    DirectRecursion { symbol: String },
    /// Functions calling each other in a loop, in traversal order.
    IndirectRecursion { cycle: Vec<String> },
}

/// Fill `exclusive` on every node: inclusive minus the metrics of each
/// outgoing edge other than self-calls, clamped at zero. Call counts are
/// copied unchanged.
pub fn compute_self(flat: &FlatProfile, nodes: &mut FunctionNodes) -> Vec<DataQualityWarning> {
    let mut warnings: Vec<DataQualityWarning> = find_cycles(nodes)
        .into_iter()
        .map(|cycle| {
            tracing::debug!(?cycle, "indirect recursion");
            DataQualityWarning::IndirectRecursion { cycle }
        })
        .collect();
    for node in nodes.values_mut() {
        let mut callees = MetricBundle::default();
        for edge in &node.callees {
            if edge.is_self_call() {
                warnings.push(DataQualityWarning::DirectRecursion {
                    symbol: node.symbol.clone(),
                });
                continue;
            }
            if let Some(metrics) = flat.get(edge) {
                callees.accumulate(metrics);
            }
        }

        node.exclusive.ct = node.inclusive.ct;
        for field in MetricField::ALL
            .into_iter()
            .filter(|f| f.is_exclusive_derived())
        {
            let inclusive = node.inclusive.get(field);
            let children = callees.get(field);
            let value = match inclusive.checked_sub(children) {
                Some(v) => v,
                None => {
                    tracing::error!(
                        symbol = %node.symbol,
                        metric = %field,
                        inclusive,
                        callees = children,
                        "negative self metric clamped to zero"
                    );
                    warnings.push(DataQualityWarning::NegativeSelfClamped {
                        symbol: node.symbol.clone(),
                        metric: field,
                        inclusive,
                        callees: children,
                    });
                    0
                }
            };
            node.exclusive.set(field, value);
        }
    }
    warnings
}

/// A flat profile together with its derived nodes. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct AugmentedProfile {
    flat: FlatProfile,
    nodes: FunctionNodes,
    warnings: Vec<DataQualityWarning>,
}

impl AugmentedProfile {
    pub fn calculate(flat: FlatProfile) -> CallscopeResult<Self> {
        let mut nodes = build_tree(&flat)?;
        let warnings = compute_self(&flat, &mut nodes);
        if !warnings.is_empty() {
            tracing::debug!(count = warnings.len(), "data quality warnings recorded");
        }
        Ok(Self {
            flat,
            nodes,
            warnings,
        })
    }

    pub fn flat(&self) -> &FlatProfile {
        &self.flat
    }

    pub fn nodes(&self) -> &FunctionNodes {
        &self.nodes
    }

    pub fn get(&self, symbol: &str) -> Option<&FunctionNode> {
        self.nodes.get(symbol)
    }

    pub fn require(&self, symbol: &str) -> CallscopeResult<&FunctionNode> {
        self.get(symbol)
            .ok_or_else(|| CallscopeError::SymbolNotFound(symbol.to_string()))
    }

    /// The `main()` node. Always present once built.
    pub fn root(&self) -> CallscopeResult<&FunctionNode> {
        self.get(ROOT_SYMBOL).ok_or_else(|| {
            CallscopeError::MalformedProfile(format!("missing {ROOT_SYMBOL} root entry"))
        })
    }

    pub fn warnings(&self) -> &[DataQualityWarning] {
        &self.warnings
    }

    /// Metrics of one caller/callee edge.
    pub fn edge(&self, key: &crate::FunctionPairKey) -> MetricBundle {
        self.flat.get(key).copied().unwrap_or_default()
    }
}

pub fn calculate_self(flat: FlatProfile) -> CallscopeResult<AugmentedProfile> {
    AugmentedProfile::calculate(flat)
}
