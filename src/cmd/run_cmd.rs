//! Run commands (`callscope list|view|top|symbol|callgraph|compare|watched|import|delete`).

use clap::Subcommand;
use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::{
    AugmentedProfile, CallscopeError, CallscopeResult, Config, DataQualityWarning, DimensionEntry,
    FlatProfile, FunctionNode, MetricBundle, MetricField, MetricKey, RankedChange,
    RelativeFilter, RunMeta, RunQuery, RunRecord, Searcher, SortDirection, WatchCommand,
    WatchedFunction, build_tree, calculate_self, compare, extract_dimension, filter,
    get_callgraph, get_callgraph_nodes, get_relatives, parse_patterns, sort, validate_threshold,
    watch_command, watched,
};

#[derive(Debug, Subcommand)]
pub enum RunCommand {
    /// List recorded runs, newest first unless `--sort` is given.
    List {
        #[arg(long)]
        url: Option<String>,
        /// Order by this metric of `main()`.
        #[arg(long)]
        sort: Option<MetricField>,
        /// Lower bound on request time (unix seconds).
        #[arg(long)]
        date_start: Option<u64>,
        /// Upper bound on request time (unix seconds).
        #[arg(long)]
        date_end: Option<u64>,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, value_enum, default_value = "desc")]
        direction: SortDirection,
    },
    /// Show the function table, charts and watched functions of one run.
    View {
        #[arg(value_name = "RUN")]
        run: String,
        /// Comma separated name patterns; bare `--filter` uses the configured list.
        #[arg(long, num_args = 0..=1, value_name = "NAMES")]
        filter: Option<Option<String>>,
    },
    /// Show the functions with the highest self cost.
    Top {
        #[arg(value_name = "RUN")]
        run: String,
        #[arg(long, default_value = "wt")]
        metric: MetricField,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show the callers and callees of one function.
    Symbol {
        #[arg(value_name = "RUN")]
        run: String,
        symbol: String,
        #[arg(long, requires = "threshold")]
        metric: Option<MetricField>,
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Export the threshold-pruned call graph.
    Callgraph {
        #[arg(value_name = "RUN")]
        run: String,
        #[arg(long)]
        metric: Option<MetricField>,
        #[arg(long)]
        threshold: Option<f64>,
        /// Emit the flattened node list used for dot rendering.
        #[arg(long)]
        dot: bool,
    },
    /// Diff the self metrics of two runs. Without a head run, list runs of
    /// the same url to compare against.
    Compare {
        #[arg(value_name = "BASE_RUN")]
        base: String,
        #[arg(value_name = "HEAD_RUN")]
        head: Option<String>,
        #[arg(long, default_value = "wt")]
        metric: MetricField,
        #[arg(long)]
        limit: Option<usize>,
        /// Candidate page when no head run is given.
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    /// Show functions matching the watch list.
    Watched {
        #[arg(value_name = "RUN")]
        run: String,
    },
    /// Manage stored watches.
    Watch {
        #[command(subcommand)]
        command: WatchCommand,
    },
    /// Store a run document or a bare profile file.
    Import {
        file: PathBuf,
        /// Run id; defaults to the document id, then the file name.
        #[arg(long)]
        id: Option<String>,
    },
    /// Delete one run.
    Delete {
        #[arg(value_name = "RUN")]
        run: String,
    },
    /// Delete every stored run.
    DeleteAll {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRow {
    pub function: String,
    pub inclusive: MetricBundle,
    #[serde(rename = "self")]
    pub exclusive: MetricBundle,
}

impl From<&FunctionNode> for ProfileRow {
    fn from(node: &FunctionNode) -> Self {
        Self {
            function: node.symbol.clone(),
            inclusive: node.inclusive,
            exclusive: node.exclusive,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunView {
    pub run: String,
    pub meta: RunMeta,
    #[serde(rename = "wallTime")]
    pub wall_time: Vec<DimensionEntry>,
    pub memory: Vec<DimensionEntry>,
    pub watches: Vec<WatchedFunction>,
    pub profile: Vec<ProfileRow>,
    pub warnings: Vec<DataQualityWarning>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopReport {
    pub run: String,
    pub metric: MetricField,
    pub total: u64,
    pub entries: Vec<DimensionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareReport {
    pub base: String,
    pub head: String,
    pub metric: MetricField,
    #[serde(rename = "totalDelta")]
    pub total_delta: i64,
    pub changes: Vec<RankedChange>,
    pub comparison: crate::ComparisonResult,
}

pub fn run_command(
    config: &Config,
    searcher: &dyn Searcher,
    command: &RunCommand,
) -> CallscopeResult<serde_json::Value> {
    match command {
        RunCommand::List {
            url,
            sort,
            date_start,
            date_end,
            page,
            direction,
        } => {
            let page = searcher.list(&RunQuery {
                url: url.clone(),
                date_start: *date_start,
                date_end: *date_end,
                page: *page,
                per_page: config.page_limit,
                direction: *direction,
                sort: *sort,
                ..Default::default()
            })?;
            Ok(serde_json::to_value(page)?)
        }
        RunCommand::View { run, filter: names } => {
            let record = searcher.get(run)?;
            let profile = calculate_self(record.profile)?;
            let view = RunView {
                run: run.clone(),
                meta: record.meta,
                wall_time: extract_dimension(&profile, MetricField::Wt, config.detail_count),
                memory: extract_dimension(&profile, MetricField::Mu, config.detail_count),
                watches: watched(&profile, &searcher.watches()?)?,
                profile: profile_table(&profile, config, names.as_ref())?,
                warnings: profile.warnings().to_vec(),
            };
            Ok(serde_json::to_value(view)?)
        }
        RunCommand::Top { run, metric, limit } => {
            let profile = load_profile(searcher, run)?;
            let report = TopReport {
                run: run.clone(),
                metric: *metric,
                total: profile.root()?.inclusive.get(*metric),
                entries: extract_dimension(&profile, *metric, limit.unwrap_or(config.detail_count)),
            };
            Ok(serde_json::to_value(report)?)
        }
        RunCommand::Symbol {
            run,
            symbol,
            metric,
            threshold,
        } => {
            let filter = threshold
                .map(|t| RelativeFilter::new(metric.unwrap_or(MetricField::Wt), t))
                .transpose()?;
            let profile = load_profile(searcher, run)?;
            let main = profile.root()?.inclusive;
            match get_relatives(&profile, symbol, filter) {
                Ok(relatives) => Ok(serde_json::json!({
                    "run": run,
                    "symbol": symbol,
                    "found": true,
                    "main": main,
                    "parents": relatives.parents,
                    "current": relatives.current,
                    "children": relatives.children,
                })),
                Err(CallscopeError::SymbolNotFound(_)) => Ok(serde_json::json!({
                    "run": run,
                    "symbol": symbol,
                    "found": false,
                    "main": main,
                    "parents": [],
                    "current": null,
                    "children": [],
                })),
                Err(err) => Err(err),
            }
        }
        RunCommand::Callgraph {
            run,
            metric,
            threshold,
            dot,
        } => {
            let metric = metric.unwrap_or(config.callgraph_metric);
            let threshold = validate_threshold(threshold.unwrap_or(config.callgraph_threshold))?;
            let profile = load_profile(searcher, run)?;
            if *dot {
                Ok(serde_json::to_value(get_callgraph_nodes(&profile, metric, threshold)?)?)
            } else {
                Ok(serde_json::to_value(get_callgraph(&profile, metric, threshold)?)?)
            }
        }
        RunCommand::Compare {
            base,
            head: None,
            page,
            ..
        } => {
            let record = searcher.get(base)?;
            let simple_url = record.meta.simple_url.or(record.meta.url);
            let candidates = searcher.list(&RunQuery {
                simple_url: simple_url.clone(),
                page: *page,
                per_page: config.page_limit,
                ..Default::default()
            })?;
            Ok(serde_json::json!({
                "base": base,
                "head": null,
                "simple_url": simple_url,
                "candidates": candidates,
            }))
        }
        RunCommand::Compare {
            base,
            head: Some(head),
            metric,
            limit,
            ..
        } => {
            let base_profile = load_profile(searcher, base)?;
            let head_profile = load_profile(searcher, head)?;
            let comparison = compare(&base_profile, &head_profile)?;
            let mut changes = comparison.ranked(&base_profile, *metric);
            if let Some(limit) = limit {
                changes.truncate(*limit);
            }
            let report = CompareReport {
                base: base.clone(),
                head: head.clone(),
                metric: *metric,
                total_delta: comparison.total_delta.get(*metric),
                changes,
                comparison,
            };
            Ok(serde_json::to_value(report)?)
        }
        RunCommand::Watched { run } => {
            let profile = load_profile(searcher, run)?;
            Ok(serde_json::json!({
                "run": run,
                "watches": watched(&profile, &searcher.watches()?)?,
            }))
        }
        RunCommand::Watch { command } => watch_command(searcher, command),
        RunCommand::Import { file, id } => {
            let record = read_import(file, id.as_deref())?;
            let functions = build_tree(&record.profile)?.len();
            searcher.save(&record)?;
            Ok(serde_json::json!({
                "imported": record.id,
                "functions": functions,
                "meta": record.meta,
            }))
        }
        RunCommand::Delete { run } => {
            searcher.delete(run)?;
            Ok(serde_json::json!({ "deleted": run }))
        }
        RunCommand::DeleteAll { yes } => {
            if !yes {
                return Err(CallscopeError::InvalidArgument(
                    "refusing to delete all runs without --yes".to_string(),
                ));
            }
            Ok(serde_json::json!({ "deleted": searcher.truncate()? }))
        }
    }
}

/// Read a run document (`{"id", "meta", "profile"}`) or a bare profile object.
fn read_import(file: &Path, id: Option<&str>) -> CallscopeResult<RunRecord> {
    let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(file)?)?;
    let mut record = if raw.get("profile").is_some() {
        serde_json::from_value::<RunRecord>(raw)?
    } else {
        RunRecord {
            id: String::new(),
            meta: RunMeta::default(),
            profile: serde_json::from_value::<FlatProfile>(raw)?,
        }
    };
    if let Some(id) = id {
        record.id = id.to_string();
    } else if record.id.is_empty() {
        record.id = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
    }
    Ok(record)
}

fn load_profile(searcher: &dyn Searcher, run: &str) -> CallscopeResult<AugmentedProfile> {
    let record = searcher.get(run)?;
    calculate_self(record.profile)
}

/// Rows sorted by self wall time, optionally filtered by name patterns.
fn profile_table(
    profile: &AugmentedProfile,
    config: &Config,
    names: Option<&Option<String>>,
) -> CallscopeResult<Vec<ProfileRow>> {
    let rows = sort(profile, MetricKey::exclusive(MetricField::Wt));
    let rows = match names {
        None => rows,
        Some(explicit) => {
            let patterns = parse_patterns(&filter_names(explicit.as_deref(), config))?;
            filter(rows, &patterns)
        }
    };
    Ok(rows.into_iter().map(ProfileRow::from).collect())
}

fn filter_names(explicit: Option<&str>, config: &Config) -> Vec<String> {
    match explicit {
        Some(list) if list.len() > 1 && list != "true" => list
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect(),
        _ => config.filter_names.clone(),
    }
}
