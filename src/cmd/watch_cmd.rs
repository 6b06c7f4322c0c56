//! Watch list management (`callscope watch list|add|remove`).

use clap::Subcommand;

use crate::{CallscopeResult, MetricField, Searcher, Watch};

#[derive(Debug, Subcommand)]
pub enum WatchCommand {
    /// Show configured and stored watches.
    List,
    /// Store a watch, replacing any stored watch with the same name.
    Add {
        /// Name pattern: `=exact`, a glob, or a substring.
        name: String,
        #[arg(long, requires = "threshold")]
        metric: Option<MetricField>,
        /// Minimum inclusive value as a fraction of `main()`.
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Remove a stored watch.
    Remove { name: String },
}

pub fn watch_command(
    searcher: &dyn Searcher,
    command: &WatchCommand,
) -> CallscopeResult<serde_json::Value> {
    match command {
        WatchCommand::List => Ok(serde_json::json!({
            "watches": searcher.watches()?,
        })),
        WatchCommand::Add {
            name,
            metric,
            threshold,
        } => {
            let watch = Watch {
                name: name.clone(),
                metric: *metric,
                threshold: *threshold,
            };
            searcher.save_watch(watch.clone())?;
            Ok(serde_json::json!({
                "saved": watch,
                "watches": searcher.watches()?,
            }))
        }
        WatchCommand::Remove { name } => {
            let removed = searcher.remove_watch(name)?;
            if !removed {
                tracing::warn!(%name, "no stored watch with that name");
            }
            Ok(serde_json::json!({
                "name": name,
                "removed": removed,
                "watches": searcher.watches()?,
            }))
        }
    }
}
