//! Reconstructs per-function nodes from the flat pair table.

use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, BTreeSet};

use crate::{CallscopeError, CallscopeResult, FlatProfile, FunctionPairKey, MetricBundle, ROOT_SYMBOL};

/// Aggregated view of one function, keyed by symbol in a [`FunctionNodes`] map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionNode {
    pub symbol: String,
    pub inclusive: MetricBundle,
    #[serde(rename = "self")]
    pub exclusive: MetricBundle,
    pub callers: BTreeSet<FunctionPairKey>,
    pub callees: BTreeSet<FunctionPairKey>,
}

impl FunctionNode {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Default::default()
        }
    }

    /// Symbols of the direct callers. Top-level entries have none.
    pub fn caller_symbols(&self) -> impl Iterator<Item = &str> {
        self.callers.iter().filter_map(|key| key.caller.as_deref())
    }

    pub fn callee_symbols(&self) -> impl Iterator<Item = &str> {
        self.callees.iter().map(|key| key.callee.as_str())
    }
}

pub type FunctionNodes = BTreeMap<String, FunctionNode>;

/// Build the symbol-indexed node map. Fails if the capture has no `main()` root.
pub fn build_tree(flat: &FlatProfile) -> CallscopeResult<FunctionNodes> {
    if flat.is_empty() {
        return Err(CallscopeError::MalformedProfile(
            "profile contains no entries".to_string(),
        ));
    }
    if flat.root().is_none() {
        return Err(CallscopeError::MalformedProfile(format!(
            "missing {ROOT_SYMBOL} root entry"
        )));
    }

    let mut nodes = FunctionNodes::new();
    for (key, metrics) in flat.iter() {
        let callee = nodes
            .entry(key.callee.clone())
            .or_insert_with(|| FunctionNode::new(&key.callee));
        // A self-call row is already contained in the outer call's row.
        if !key.is_self_call() {
            callee.inclusive.accumulate(metrics);
        }
        callee.callers.insert(key.clone());

        if let Some(caller) = &key.caller {
            nodes
                .entry(caller.clone())
                .or_insert_with(|| FunctionNode::new(caller))
                .callees
                .insert(key.clone());
        }
    }

    tracing::debug!(
        pairs = flat.len(),
        functions = nodes.len(),
        "built call tree"
    );
    Ok(nodes)
}

/// Symbols reachable from `main()` following callee edges, in breadth-first order.
/// Each symbol is visited once, so recursive edges terminate.
pub fn reachable_from_root(nodes: &FunctionNodes) -> Vec<&str> {
    let mut order = Vec::new();
    let mut seen = BTreeSet::new();
    let Some(root) = nodes.get(ROOT_SYMBOL) else {
        return order;
    };
    let mut queue = std::collections::VecDeque::from([root.symbol.as_str()]);
    seen.insert(root.symbol.as_str());
    while let Some(symbol) = queue.pop_front() {
        order.push(symbol);
        let Some(node) = nodes.get(symbol) else {
            continue;
        };
        for callee in node.callee_symbols() {
            if seen.insert(callee) {
                queue.push_back(callee);
            }
        }
    }
    order
}

/// Call cycles spanning more than one function (`a -> b -> a`), each listed
/// from the first symbol entered. Direct self-calls are not reported here.
pub fn find_cycles(nodes: &FunctionNodes) -> Vec<Vec<String>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Active,
        Done,
    }

    // Reversed so that popping visits callees in ascending order.
    fn pending_callees<'a>(nodes: &'a FunctionNodes, symbol: &str) -> Vec<&'a str> {
        let mut out: Vec<&str> = nodes
            .get(symbol)
            .map(|node| node.callee_symbols().filter(|c| *c != symbol).collect())
            .unwrap_or_default();
        out.reverse();
        out
    }

    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    let mut cycles = Vec::new();
    for start in nodes.keys() {
        if marks.contains_key(start.as_str()) {
            continue;
        }
        marks.insert(start.as_str(), Mark::Active);
        let mut path = vec![start.as_str()];
        let mut stack = vec![pending_callees(nodes, start)];
        while let Some(pending) = stack.last_mut() {
            match pending.pop() {
                Some(next) => match marks.get(next).copied() {
                    None => {
                        marks.insert(next, Mark::Active);
                        path.push(next);
                        stack.push(pending_callees(nodes, next));
                    }
                    Some(Mark::Active) => {
                        if let Some(from) = path.iter().position(|s| *s == next) {
                            cycles.push(path[from..].iter().map(|s| s.to_string()).collect());
                        }
                    }
                    Some(Mark::Done) => {}
                },
                None => {
                    stack.pop();
                    if let Some(done) = path.pop() {
                        marks.insert(done, Mark::Done);
                    }
                }
            }
        }
    }
    cycles
}
