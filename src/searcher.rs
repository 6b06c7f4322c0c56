//! Run storage collaborator: supplies flat profiles and the watch list.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{
    CallscopeError, CallscopeResult, Config, FlatProfile, MetricField, Watch, validate_threshold,
};

const RUNS_DIR: &str = "runs";
const WATCHES_FILE: &str = "watches.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple_url: Option<String>,
    /// Request start, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_ts: Option<u64>,
}

/// One stored run document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub meta: RunMeta,
    pub profile: FlatProfile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub meta: RunMeta,
    #[serde(rename = "wallTime")]
    pub wall_time: u64,
    #[serde(rename = "peakMemory")]
    pub peak_memory: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl clap::ValueEnum for SortDirection {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Asc, Self::Desc]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Asc => clap::builder::PossibleValue::new("asc"),
            Self::Desc => clap::builder::PossibleValue::new("desc"),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunQuery {
    /// Substring of the request or simplified url.
    pub url: Option<String>,
    /// Exact simplified url; runs without one are matched on their url.
    pub simple_url: Option<String>,
    pub date_start: Option<u64>,
    pub date_end: Option<u64>,
    /// 1-based page number.
    pub page: usize,
    pub per_page: usize,
    pub direction: SortDirection,
    /// Order by this metric of the run's `main()` entry instead of request time.
    pub sort: Option<MetricField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPage {
    pub title: String,
    pub results: Vec<RunSummary>,
    pub page: usize,
    #[serde(rename = "totalPages")]
    pub total_pages: usize,
    pub direction: SortDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<MetricField>,
}

/// Heading for a run listing ordered by `sort`.
pub fn list_title(sort: Option<MetricField>) -> &'static str {
    match sort {
        Some(MetricField::Wt) => "Longest wall time",
        Some(MetricField::Cpu) => "Most CPU time",
        Some(MetricField::Mu) => "Highest memory use",
        _ => "Recent runs",
    }
}

pub trait Searcher {
    fn get(&self, run_id: &str) -> CallscopeResult<RunRecord>;

    fn list(&self, query: &RunQuery) -> CallscopeResult<RunPage>;

    /// Store a run under its id, replacing any run with the same id.
    fn save(&self, record: &RunRecord) -> CallscopeResult<()>;

    fn delete(&self, run_id: &str) -> CallscopeResult<()>;

    /// Delete every stored run. Returns how many were removed.
    fn truncate(&self) -> CallscopeResult<usize>;

    /// Configured watches merged with stored ones; a stored watch replaces a
    /// configured watch of the same name.
    fn watches(&self) -> CallscopeResult<Vec<Watch>>;

    /// Insert or replace a stored watch by name.
    fn save_watch(&self, watch: Watch) -> CallscopeResult<()>;

    /// Returns false when no stored watch has that name.
    fn remove_watch(&self, name: &str) -> CallscopeResult<bool>;
}

/// Reads one `<id>.json` document per run from `<base>/runs`, and stored
/// watches from `<base>/watches.json`.
#[derive(Debug, Clone)]
pub struct DirSearcher {
    runs_dir: PathBuf,
    watches_path: PathBuf,
    configured: Vec<Watch>,
}

impl DirSearcher {
    pub fn new(base_dir: &Path, configured: Vec<Watch>) -> Self {
        Self {
            runs_dir: base_dir.join(RUNS_DIR),
            watches_path: base_dir.join(WATCHES_FILE),
            configured,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.base_dir, config.watches.clone())
    }

    fn run_path(&self, run_id: &str) -> CallscopeResult<PathBuf> {
        let valid = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !run_id.starts_with('.');
        if !valid {
            return Err(CallscopeError::InvalidArgument(format!(
                "invalid run id {run_id:?}"
            )));
        }
        Ok(self.runs_dir.join(format!("{run_id}.json")))
    }

    fn run_files(&self) -> CallscopeResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        if !self.runs_dir.is_dir() {
            return Ok(files);
        }
        for entry in WalkDir::new(&self.runs_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                let msg = e.to_string();
                CallscopeError::Io(e.into_io_error().unwrap_or_else(|| std::io::Error::other(msg)))
            })?;
            let path = entry.path();
            if entry.file_type().is_file()
                && path.extension().and_then(|e| e.to_str()) == Some("json")
            {
                files.push(path.to_path_buf());
            }
        }
        Ok(files)
    }

    fn stored_watches(&self) -> CallscopeResult<Vec<Watch>> {
        match std::fs::read(&self.watches_path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    fn write_watches(&self, watches: &[Watch]) -> CallscopeResult<()> {
        if let Some(parent) = self.watches_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.watches_path, serde_json::to_vec_pretty(watches)?)?;
        Ok(())
    }

    fn read_record(path: &Path, fallback_id: &str) -> CallscopeResult<RunRecord> {
        let bytes = std::fs::read(path)?;
        let mut record: RunRecord = serde_json::from_slice(&bytes)?;
        if record.id.is_empty() {
            record.id = fallback_id.to_string();
        }
        Ok(record)
    }
}

impl Searcher for DirSearcher {
    fn get(&self, run_id: &str) -> CallscopeResult<RunRecord> {
        let path = self.run_path(run_id)?;
        match Self::read_record(&path, run_id) {
            Err(CallscopeError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(CallscopeError::RunNotFound(run_id.to_string()))
            }
            other => other,
        }
    }

    fn list(&self, query: &RunQuery) -> CallscopeResult<RunPage> {
        if query.per_page == 0 {
            return Err(CallscopeError::InvalidArgument(
                "per_page must be at least 1".to_string(),
            ));
        }

        let mut runs = Vec::new();
        for path in self.run_files()? {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            match Self::read_record(&path, stem) {
                Ok(record) => runs.push(record),
                Err(err) => tracing::warn!("skipping run file {}: {err}", path.display()),
            }
        }

        let mut matched: Vec<(u64, RunSummary)> = runs
            .into_iter()
            .filter(|run| matches_query(&run.meta, query))
            .map(|run| {
                let root = run.profile.root().copied().unwrap_or_default();
                let key = match query.sort {
                    Some(field) => root.get(field),
                    None => run.meta.request_ts.unwrap_or(0),
                };
                let summary = RunSummary {
                    id: run.id,
                    meta: run.meta,
                    wall_time: root.wt,
                    peak_memory: root.pmu,
                };
                (key, summary)
            })
            .collect();
        matched.sort_by(|(a_key, a), (b_key, b)| {
            let order = a_key.cmp(b_key).then_with(|| a.id.cmp(&b.id));
            match query.direction {
                SortDirection::Asc => order,
                SortDirection::Desc => order.reverse(),
            }
        });

        let total_pages = matched.len().div_ceil(query.per_page).max(1);
        let page = query.page.clamp(1, total_pages);
        let results = matched
            .into_iter()
            .skip((page - 1) * query.per_page)
            .take(query.per_page)
            .map(|(_, summary)| summary)
            .collect();
        Ok(RunPage {
            title: list_title(query.sort).to_string(),
            results,
            page,
            total_pages,
            direction: query.direction,
            sort: query.sort,
        })
    }

    fn save(&self, record: &RunRecord) -> CallscopeResult<()> {
        let path = self.run_path(&record.id)?;
        std::fs::create_dir_all(&self.runs_dir)?;
        std::fs::write(&path, serde_json::to_vec_pretty(record)?)?;
        tracing::debug!(run = %record.id, path = %path.display(), "saved run");
        Ok(())
    }

    fn delete(&self, run_id: &str) -> CallscopeResult<()> {
        let path = self.run_path(run_id)?;
        match std::fs::remove_file(&path) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(CallscopeError::RunNotFound(run_id.to_string()))
            }
            other => other.map_err(CallscopeError::from),
        }
    }

    fn truncate(&self) -> CallscopeResult<usize> {
        let files = self.run_files()?;
        for path in &files {
            std::fs::remove_file(path)?;
        }
        tracing::info!(removed = files.len(), "deleted all runs");
        Ok(files.len())
    }

    fn watches(&self) -> CallscopeResult<Vec<Watch>> {
        let stored = self.stored_watches()?;
        let mut merged: Vec<Watch> = self
            .configured
            .iter()
            .filter(|watch| !stored.iter().any(|s| s.name == watch.name))
            .cloned()
            .collect();
        merged.extend(stored);
        Ok(merged)
    }

    fn save_watch(&self, watch: Watch) -> CallscopeResult<()> {
        if watch.name.trim().is_empty() {
            return Err(CallscopeError::InvalidArgument(
                "watch name must not be empty".to_string(),
            ));
        }
        if let Some(threshold) = watch.threshold {
            validate_threshold(threshold)?;
        }
        let mut stored = self.stored_watches()?;
        match stored.iter_mut().find(|s| s.name == watch.name) {
            Some(existing) => *existing = watch,
            None => stored.push(watch),
        }
        self.write_watches(&stored)
    }

    fn remove_watch(&self, name: &str) -> CallscopeResult<bool> {
        let mut stored = self.stored_watches()?;
        let before = stored.len();
        stored.retain(|watch| watch.name != name);
        if stored.len() == before {
            return Ok(false);
        }
        self.write_watches(&stored)?;
        Ok(true)
    }
}

fn matches_query(meta: &RunMeta, query: &RunQuery) -> bool {
    let simple_url = meta.simple_url.as_deref().or(meta.url.as_deref());
    if query
        .simple_url
        .as_deref()
        .is_some_and(|wanted| simple_url != Some(wanted))
    {
        return false;
    }
    if let Some(url) = &query.url {
        let hit = [&meta.url, &meta.simple_url]
            .into_iter()
            .flatten()
            .any(|candidate| candidate.contains(url.as_str()));
        if !hit {
            return false;
        }
    }
    let ts = meta.request_ts.unwrap_or(0);
    if query.date_start.is_some_and(|start| ts < start) {
        return false;
    }
    if query.date_end.is_some_and(|end| ts > end) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FunctionPairKey, MetricBundle};

    fn temp_workspace(name: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("callscope-searcher-{name}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("workspace");
        dir
    }

    fn record(id: &str, url: &str, ts: u64, wt: u64) -> RunRecord {
        RunRecord {
            id: id.to_string(),
            meta: RunMeta {
                url: Some(url.to_string()),
                simple_url: None,
                request_ts: Some(ts),
            },
            profile: FlatProfile::from_pairs([(
                FunctionPairKey::root(),
                MetricBundle {
                    ct: 1,
                    wt,
                    cpu: 1000 - wt,
                    mu: wt * 2,
                    pmu: wt * 10,
                },
            )]),
        }
    }

    fn seeded(name: &str) -> DirSearcher {
        let searcher = DirSearcher::new(&temp_workspace(name), Vec::new());
        searcher.save(&record("r1", "/home", 100, 10)).expect("r1");
        searcher.save(&record("r2", "/cart?id=4", 200, 20)).expect("r2");
        searcher.save(&record("r3", "/home", 300, 30)).expect("r3");
        searcher
    }

    #[test]
    fn get_reads_saved_run() {
        let searcher = seeded("get");
        let run = searcher.get("r2").expect("r2");
        assert_eq!(run.meta.request_ts, Some(200));
        assert_eq!(run.profile.root().map(|m| m.wt), Some(20));
    }

    #[test]
    fn get_missing_and_invalid_ids() {
        let searcher = seeded("missing");
        assert!(matches!(
            searcher.get("nope"),
            Err(CallscopeError::RunNotFound(_))
        ));
        assert!(matches!(
            searcher.get("../etc/passwd"),
            Err(CallscopeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn list_filters_sorts_and_paginates() {
        let searcher = seeded("list");
        let page = searcher
            .list(&RunQuery {
                url: Some("/home".to_string()),
                page: 1,
                per_page: 1,
                ..Default::default()
            })
            .expect("list");
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].id, "r3");
        assert_eq!(page.results[0].peak_memory, 300);

        let page = searcher
            .list(&RunQuery {
                date_start: Some(150),
                page: 9,
                per_page: 10,
                direction: SortDirection::Asc,
                ..Default::default()
            })
            .expect("list");
        assert_eq!(page.page, 1);
        let ids: Vec<_> = page.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r3"]);
    }

    #[test]
    fn list_skips_unreadable_files_and_missing_dir() {
        let searcher = seeded("skip");
        std::fs::write(searcher.runs_dir.join("broken.json"), b"{not json").expect("write");
        let page = searcher
            .list(&RunQuery {
                page: 1,
                per_page: 10,
                ..Default::default()
            })
            .expect("list");
        assert_eq!(page.results.len(), 3);

        let empty = DirSearcher::new(&temp_workspace("empty").join("absent"), Vec::new());
        let page = empty
            .list(&RunQuery {
                page: 1,
                per_page: 5,
                ..Default::default()
            })
            .expect("list");
        assert!(page.results.is_empty());
        assert_eq!(page.total_pages, 1);
    }

    #[test]
    fn list_sorts_by_root_metric_with_title() {
        let searcher = seeded("sort");
        let query = RunQuery {
            page: 1,
            per_page: 10,
            sort: Some(MetricField::Cpu),
            ..Default::default()
        };
        let page = searcher.list(&query).expect("list");
        assert_eq!(page.title, "Most CPU time");
        let ids: Vec<_> = page.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2", "r3"]);

        let page = searcher
            .list(&RunQuery {
                sort: Some(MetricField::Wt),
                direction: SortDirection::Asc,
                ..query.clone()
            })
            .expect("list");
        assert_eq!(page.title, "Longest wall time");
        assert_eq!(page.results[0].id, "r1");

        let page = searcher
            .list(&RunQuery { sort: None, ..query })
            .expect("list");
        assert_eq!(page.title, "Recent runs");
        assert_eq!(page.results[0].id, "r3");
        assert_eq!(list_title(Some(MetricField::Mu)), "Highest memory use");
    }

    #[test]
    fn simple_url_filter_is_exact() {
        let searcher = seeded("simple");
        let mut tagged = record("r4", "/home?page=2", 400, 40);
        tagged.meta.simple_url = Some("/home".to_string());
        searcher.save(&tagged).expect("r4");
        let page = searcher
            .list(&RunQuery {
                simple_url: Some("/home".to_string()),
                page: 1,
                per_page: 10,
                ..Default::default()
            })
            .expect("list");
        let ids: Vec<_> = page.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r4", "r3", "r1"]);
    }

    #[test]
    fn delete_and_truncate_remove_runs() {
        let searcher = seeded("delete");
        searcher.delete("r2").expect("delete");
        assert!(matches!(
            searcher.get("r2"),
            Err(CallscopeError::RunNotFound(_))
        ));
        assert!(matches!(
            searcher.delete("r2"),
            Err(CallscopeError::RunNotFound(_))
        ));

        assert_eq!(searcher.truncate().expect("truncate"), 2);
        let page = searcher
            .list(&RunQuery {
                page: 1,
                per_page: 10,
                ..Default::default()
            })
            .expect("list");
        assert!(page.results.is_empty());
        assert_eq!(searcher.truncate().expect("again"), 0);
    }

    #[test]
    fn stored_watches_merge_with_configured() {
        let configured = vec![
            Watch {
                name: "PDO*".to_string(),
                metric: None,
                threshold: None,
            },
            Watch {
                name: "curl_exec".to_string(),
                metric: None,
                threshold: None,
            },
        ];
        let searcher = DirSearcher::new(&temp_workspace("watches"), configured);
        assert_eq!(searcher.watches().expect("watches").len(), 2);

        searcher
            .save_watch(Watch {
                name: "curl_exec".to_string(),
                metric: Some(MetricField::Wt),
                threshold: Some(0.2),
            })
            .expect("update");
        searcher
            .save_watch(Watch {
                name: "strlen".to_string(),
                metric: None,
                threshold: None,
            })
            .expect("insert");
        let watches = searcher.watches().expect("watches");
        let names: Vec<_> = watches.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["PDO*", "curl_exec", "strlen"]);
        assert_eq!(watches[1].threshold, Some(0.2));

        assert!(searcher.remove_watch("strlen").expect("remove"));
        assert!(!searcher.remove_watch("PDO*").expect("configured only"));
        assert_eq!(searcher.watches().expect("watches").len(), 2);

        let err = searcher
            .save_watch(Watch {
                name: "x".to_string(),
                metric: None,
                threshold: Some(1.5),
            })
            .expect_err("threshold");
        assert!(matches!(err, CallscopeError::InvalidThreshold(_)));
    }
}
