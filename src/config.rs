//! `callscope.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::{CallscopeError, CallscopeResult, MetricField, Watch, validate_threshold};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Reporter {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Base directory holding recorded runs.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Default reporter for CLI commands.
    #[serde(default = "default_reporter")]
    pub reporter: Reporter,

    /// Number of functions shown in the run view charts.
    #[serde(default = "default_detail_count")]
    pub detail_count: usize,

    /// Name patterns applied by `view --filter` when no list is given.
    #[serde(default)]
    pub filter_names: Vec<String>,

    #[serde(default = "default_callgraph_metric")]
    pub callgraph_metric: MetricField,

    #[serde(default = "default_callgraph_threshold")]
    pub callgraph_threshold: f64,

    /// Runs per page in listings.
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,

    #[serde(default)]
    pub watches: Vec<Watch>,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".callscope")
}

fn default_reporter() -> Reporter {
    Reporter::Pretty
}

fn default_detail_count() -> usize {
    6
}

fn default_callgraph_metric() -> MetricField {
    MetricField::Wt
}

fn default_callgraph_threshold() -> f64 {
    0.01
}

fn default_page_limit() -> usize {
    25
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            reporter: default_reporter(),
            detail_count: default_detail_count(),
            filter_names: Vec::new(),
            callgraph_metric: default_callgraph_metric(),
            callgraph_threshold: default_callgraph_threshold(),
            page_limit: default_page_limit(),
            watches: Vec::new(),
        }
    }
}

impl Config {
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match Self::parse(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to load config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(raw: &str) -> CallscopeResult<Self> {
        let cfg = toml::from_str::<Config>(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> CallscopeResult<()> {
        validate_threshold(self.callgraph_threshold)?;
        if self.page_limit == 0 {
            return Err(CallscopeError::Config(
                "page_limit must be at least 1".to_string(),
            ));
        }
        for watch in &self.watches {
            if let Some(threshold) = watch.threshold {
                validate_threshold(threshold)?;
            }
        }
        Ok(())
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.base_dir.join("runs")
    }
}
