//! Sorting, name filtering and watch-list matching over the augmented table.

use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};

use crate::{
    AugmentedProfile, CallscopeError, CallscopeResult, FunctionNode, MetricBundle, MetricField,
    MetricKey, MetricScope, validate_threshold,
};

fn metric_of(node: &FunctionNode, key: MetricKey) -> u64 {
    match key.scope {
        MetricScope::Inclusive => node.inclusive.get(key.field),
        MetricScope::Exclusive => node.exclusive.get(key.field),
    }
}

/// Descending on `key`, symbol ascending on ties.
pub fn sort_nodes<'a>(
    nodes: impl IntoIterator<Item = &'a FunctionNode>,
    key: MetricKey,
) -> Vec<&'a FunctionNode> {
    let mut rows: Vec<_> = nodes.into_iter().collect();
    rows.sort_by(|a, b| {
        metric_of(b, key)
            .cmp(&metric_of(a, key))
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    rows
}

pub fn sort(profile: &AugmentedProfile, key: MetricKey) -> Vec<&FunctionNode> {
    sort_nodes(profile.nodes().values(), key)
}

/// A function-name pattern: `=name` is exact, glob metacharacters compile
/// to a glob, anything else matches as a substring.
#[derive(Debug, Clone)]
pub enum NamePattern {
    Exact(String),
    Substring(String),
    Glob(GlobMatcher),
}

impl NamePattern {
    pub fn parse(raw: &str) -> CallscopeResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CallscopeError::InvalidArgument(
                "empty name pattern".to_string(),
            ));
        }
        if let Some(exact) = raw.strip_prefix('=') {
            return Ok(Self::Exact(exact.to_string()));
        }
        if raw.contains(['*', '?', '[', '{']) {
            let glob = Glob::new(raw).map_err(|e| {
                CallscopeError::InvalidArgument(format!("invalid pattern {raw:?}: {e}"))
            })?;
            return Ok(Self::Glob(glob.compile_matcher()));
        }
        Ok(Self::Substring(raw.to_string()))
    }

    pub fn matches(&self, symbol: &str) -> bool {
        match self {
            Self::Exact(name) => symbol == name,
            Self::Substring(part) => symbol.contains(part.as_str()),
            Self::Glob(matcher) => matcher.is_match(symbol),
        }
    }
}

pub fn parse_patterns(raw: &[String]) -> CallscopeResult<Vec<NamePattern>> {
    raw.iter().map(|p| NamePattern::parse(p)).collect()
}

/// Keep rows whose symbol matches any pattern, preserving order.
pub fn filter<'a>(rows: Vec<&'a FunctionNode>, patterns: &[NamePattern]) -> Vec<&'a FunctionNode> {
    rows.into_iter()
        .filter(|node| patterns.iter().any(|p| p.matches(&node.symbol)))
        .collect()
}

/// One watch-list entry. With `metric` and `threshold` set, only functions
/// at or above that fraction of the root total are reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watch {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<MetricField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedFunction {
    pub watch: String,
    pub function: String,
    pub inclusive: MetricBundle,
    #[serde(rename = "self")]
    pub exclusive: MetricBundle,
}

pub fn watched(profile: &AugmentedProfile, watches: &[Watch]) -> CallscopeResult<Vec<WatchedFunction>> {
    let root = profile.root()?;
    let mut out = Vec::new();
    for watch in watches {
        let pattern = NamePattern::parse(&watch.name)?;
        let floor = match (watch.metric, watch.threshold) {
            (Some(metric), Some(threshold)) => {
                let threshold = validate_threshold(threshold)?;
                Some((metric, threshold * root.inclusive.get(metric) as f64))
            }
            _ => None,
        };
        for node in sort(profile, MetricKey::exclusive(MetricField::Wt)) {
            if !pattern.matches(&node.symbol) {
                continue;
            }
            let below_floor = floor
                .is_some_and(|(metric, floor)| (node.inclusive.get(metric) as f64) < floor);
            if below_floor {
                continue;
            }
            out.push(WatchedFunction {
                watch: watch.name.clone(),
                function: node.symbol.clone(),
                inclusive: node.inclusive,
                exclusive: node.exclusive,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FlatProfile, FunctionPairKey, calculate_self};

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
            (FunctionPairKey::new("main()", "App\\Kernel::handle"), bundle(900)),
            (
                FunctionPairKey::new("App\\Kernel::handle", "PDO::query"),
                bundle(300),
            ),
            (
                FunctionPairKey::new("App\\Kernel::handle", "PDOStatement::fetch"),
                bundle(50),
            ),
            (
                FunctionPairKey::new("App\\Kernel::handle", "strlen"),
                bundle(5),
            ),
        ]))
        .expect("profile")
    }

    #[test]
    fn sort_is_descending_with_symbol_tiebreak() {
        let profile = sample();
        let inclusive: Vec<_> = sort(&profile, MetricKey::inclusive(MetricField::Wt))
            .into_iter()
            .map(|n| n.symbol.as_str())
            .collect();
        assert_eq!(
            inclusive,
            vec!["main()", "App\\Kernel::handle", "PDO::query", "PDOStatement::fetch", "strlen"]
        );

        let calls: Vec<_> = sort(&profile, MetricKey::inclusive(MetricField::Ct))
            .into_iter()
            .map(|n| n.symbol.as_str())
            .collect();
        let mut alphabetical = calls.clone();
        alphabetical.sort();
        assert_eq!(calls, alphabetical);
    }

    #[test]
    fn exclusive_sort_uses_self_values() {
        let profile = sample();
        let top = sort(&profile, MetricKey::exclusive(MetricField::Wt));
        assert_eq!(top[0].symbol, "App\\Kernel::handle");
        assert_eq!(top[0].exclusive.wt, 545);
    }

    #[test]
    fn pattern_kinds() {
        let exact = NamePattern::parse("=strlen").expect("exact");
        assert!(exact.matches("strlen"));
        assert!(!exact.matches("mb_strlen"));

        let sub = NamePattern::parse("PDO").expect("substring");
        assert!(sub.matches("PDOStatement::fetch"));

        let glob = NamePattern::parse("PDO*::fetch").expect("glob");
        assert!(glob.matches("PDOStatement::fetch"));
        assert!(!glob.matches("PDO::query"));

        assert!(NamePattern::parse("  ").is_err());
    }

    #[test]
    fn filter_keeps_sorted_order() {
        let profile = sample();
        let patterns = parse_patterns(&["PDO".to_string(), "=strlen".to_string()]).expect("patterns");
        let rows = filter(sort(&profile, MetricKey::exclusive(MetricField::Wt)), &patterns);
        let names: Vec<_> = rows.iter().map(|n| n.symbol.as_str()).collect();
        assert_eq!(names, vec!["PDO::query", "PDOStatement::fetch", "strlen"]);
    }

    #[test]
    fn watch_threshold_drops_small_functions() {
        let profile = sample();
        let watches = vec![
            Watch {
                name: "PDO".to_string(),
                metric: Some(MetricField::Wt),
                threshold: Some(0.1),
            },
            Watch {
                name: "strlen".to_string(),
                metric: None,
                threshold: None,
            },
        ];
        let found = watched(&profile, &watches).expect("watched");
        let names: Vec<_> = found.iter().map(|w| w.function.as_str()).collect();
        assert_eq!(names, vec!["PDO::query", "strlen"]);
        assert_eq!(found[0].watch, "PDO");
        assert_eq!(found[0].inclusive.wt, 300);
    }

    #[test]
    fn watch_with_bad_threshold_is_rejected() {
        let watches = vec![Watch {
            name: "PDO".to_string(),
            metric: Some(MetricField::Wt),
            threshold: Some(1.5),
        }];
        assert!(matches!(
            watched(&sample(), &watches),
            Err(CallscopeError::InvalidThreshold(_))
        ));
    }
}
