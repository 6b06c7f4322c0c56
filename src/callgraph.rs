//! Threshold-pruned call graphs for the browser renderer.
//!
//! Both shapes share the same node selection: every function reachable from
//! `main()` whose inclusive value of the chosen metric is at least
//! `threshold` of the root total.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::{
    AugmentedProfile, CallscopeResult, FunctionNode, MetricBundle, MetricField,
    reachable_from_root, validate_threshold,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: usize,
    pub label: String,
    pub value: u64,
    pub metrics: NodeMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub inclusive: MetricBundle,
    #[serde(rename = "self")]
    pub exclusive: MetricBundle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: usize,
    pub to: usize,
    pub metrics: MetricBundle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericGraph {
    pub metric: MetricField,
    pub threshold: f64,
    pub total: u64,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// A node pre-formatted for templating into a graph description language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DotNode {
    pub name: String,
    pub value: u64,
    pub percent: f64,
    #[serde(rename = "displayValue")]
    pub display_value: String,
    #[serde(rename = "displayPercent")]
    pub display_percent: String,
    /// Callees that also passed the threshold.
    pub callees: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeList {
    pub metric: MetricField,
    pub threshold: f64,
    pub total: u64,
    pub nodes: Vec<DotNode>,
}

struct Selection<'a> {
    total: u64,
    nodes: Vec<&'a FunctionNode>,
    ids: BTreeMap<&'a str, usize>,
}

fn select<'a>(
    profile: &'a AugmentedProfile,
    metric: MetricField,
    threshold: f64,
) -> CallscopeResult<Selection<'a>> {
    let threshold = validate_threshold(threshold)?;
    let total = profile.root()?.inclusive.get(metric);
    let floor = threshold * total as f64;

    let nodes: Vec<&FunctionNode> = reachable_from_root(profile.nodes())
        .into_iter()
        .filter_map(|symbol| profile.get(symbol))
        .filter(|node| node.inclusive.get(metric) as f64 >= floor)
        .collect();
    let ids = nodes
        .iter()
        .enumerate()
        .map(|(id, node)| (node.symbol.as_str(), id))
        .collect();

    tracing::debug!(
        %metric,
        threshold,
        kept = nodes.len(),
        functions = profile.nodes().len(),
        "selected call graph nodes"
    );
    Ok(Selection { total, nodes, ids })
}

pub fn get_callgraph(
    profile: &AugmentedProfile,
    metric: MetricField,
    threshold: f64,
) -> CallscopeResult<GenericGraph> {
    let selection = select(profile, metric, threshold)?;

    let mut edges = Vec::new();
    for (from, node) in selection.nodes.iter().enumerate() {
        for key in &node.callees {
            if let Some(&to) = selection.ids.get(key.callee.as_str()) {
                edges.push(GraphEdge {
                    from,
                    to,
                    metrics: profile.edge(key),
                });
            }
        }
    }

    let nodes = selection
        .nodes
        .iter()
        .enumerate()
        .map(|(id, node)| GraphNode {
            id,
            label: node.symbol.clone(),
            value: node.inclusive.get(metric),
            metrics: NodeMetrics {
                inclusive: node.inclusive,
                exclusive: node.exclusive,
            },
        })
        .collect();

    Ok(GenericGraph {
        metric,
        threshold,
        total: selection.total,
        nodes,
        edges,
    })
}

pub fn get_callgraph_nodes(
    profile: &AugmentedProfile,
    metric: MetricField,
    threshold: f64,
) -> CallscopeResult<NodeList> {
    let selection = select(profile, metric, threshold)?;
    let nodes = selection
        .nodes
        .iter()
        .map(|node| {
            let value = node.inclusive.get(metric);
            let percent = percent_of(value, selection.total);
            DotNode {
                name: node.symbol.clone(),
                value,
                percent,
                display_value: format!("{} {}", group_thousands(value), metric.unit()),
                display_percent: format!("{percent:.2}%"),
                callees: node
                    .callee_symbols()
                    .filter(|callee| selection.ids.contains_key(callee))
                    .map(str::to_string)
                    .collect(),
            }
        })
        .collect();

    Ok(NodeList {
        metric,
        threshold,
        total: selection.total,
        nodes,
    })
}

fn percent_of(value: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    value as f64 / total as f64 * 100.0
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallscopeError, FlatProfile, FunctionPairKey, calculate_self};

    fn bundle(wt: u64) -> MetricBundle {
        MetricBundle {
            ct: 1,
            wt,
            ..Default::default()
        }
    }

    fn sample() -> AugmentedProfile {
        calculate_self(FlatProfile::from_pairs([
            (FunctionPairKey::root(), bundle(1000)),
            (FunctionPairKey::new("main()", "route"), bundle(600)),
            (FunctionPairKey::new("main()", "boot"), bundle(50)),
            (FunctionPairKey::new("route", "render"), bundle(400)),
            (FunctionPairKey::new("route", "log"), bundle(5)),
            (FunctionPairKey::new("render", "render"), bundle(100)),
            (FunctionPairKey::new("unreached", "ghost"), bundle(999)),
        ]))
        .expect("profile")
    }

    fn labels(graph: &GenericGraph) -> Vec<&str> {
        graph.nodes.iter().map(|n| n.label.as_str()).collect()
    }

    #[test]
    fn zero_threshold_keeps_every_reachable_node() {
        let graph = get_callgraph(&sample(), MetricField::Wt, 0.0).expect("graph");
        assert_eq!(labels(&graph), vec!["main()", "boot", "route", "log", "render"]);
        assert_eq!(graph.total, 1000);
        assert_eq!(graph.edges.len(), 5);
    }

    #[test]
    fn full_threshold_keeps_only_root() {
        let graph = get_callgraph(&sample(), MetricField::Wt, 1.0).expect("graph");
        assert_eq!(labels(&graph), vec!["main()"]);
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn self_calls_do_not_inflate_node_values() {
        let profile = calculate_self(FlatProfile::from_pairs([
            (FunctionPairKey::root(), bundle(100)),
            (FunctionPairKey::new("main()", "walk"), bundle(90)),
            (FunctionPairKey::new("walk", "walk"), bundle(70)),
        ]))
        .expect("profile");
        let graph = get_callgraph(&profile, MetricField::Wt, 1.0).expect("graph");
        assert_eq!(labels(&graph), vec!["main()"]);

        let graph = get_callgraph(&profile, MetricField::Wt, 0.0).expect("graph");
        assert_eq!(graph.nodes[1].label, "walk");
        assert_eq!(graph.nodes[1].value, 90);
        assert_eq!(graph.nodes[1].metrics.exclusive.wt, 90);
    }

    #[test]
    fn edges_require_both_endpoints() {
        let graph = get_callgraph(&sample(), MetricField::Wt, 0.1).expect("graph");
        assert_eq!(labels(&graph), vec!["main()", "route", "render"]);
        let edges: Vec<_> = graph
            .edges
            .iter()
            .map(|e| (e.from, e.to, e.metrics.wt))
            .collect();
        assert_eq!(edges, vec![(0, 1, 600), (1, 2, 400), (2, 2, 100)]);
    }

    #[test]
    fn threshold_outside_unit_range_fails() {
        for bad in [-0.01, 1.01, f64::NAN] {
            let err = get_callgraph(&sample(), MetricField::Wt, bad).expect_err("invalid");
            assert!(matches!(err, CallscopeError::InvalidThreshold(_)));
            assert!(get_callgraph_nodes(&sample(), MetricField::Wt, bad).is_err());
        }
    }

    #[test]
    fn dot_nodes_carry_display_metrics() {
        let list = get_callgraph_nodes(&sample(), MetricField::Wt, 0.04).expect("nodes");
        let names: Vec<_> = list.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["main()", "boot", "route", "render"]);
        let route = &list.nodes[2];
        assert_eq!(route.display_percent, "60.00%");
        assert_eq!(route.display_value, "600 µs");
        assert_eq!(route.callees, vec!["render".to_string()]);
        assert_eq!(list.nodes[0].display_value, "1,000 µs");
    }

    #[test]
    fn serializes_to_plain_json() {
        let graph = get_callgraph(&sample(), MetricField::Wt, 0.5).expect("graph");
        let json = serde_json::to_value(&graph).expect("json");
        assert_eq!(json["metric"], "wt");
        assert_eq!(json["nodes"][1]["label"], "route");
        assert_eq!(json["nodes"][1]["metrics"]["self"]["wt"], 195);
        assert_eq!(json["edges"][0]["from"], 0);
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }
}
