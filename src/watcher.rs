use anyhow::{Context, Result};
use glob::glob;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::DiscoverySettings;
use crate::reassembly::CompletedReport;
use crate::tailer::{tail_file, TailerConfig};

/// Keep the set of tailed files in sync with the source glob.
///
/// Every scan re-evaluates the pattern and starts a tailer for each matching
/// file not already monitored. A path that later disappears from the glob is
/// left alone: rotation is the tailer's problem, not discovery's. A tailer
/// whose task has finished (the path became unreadable) is respawned on a
/// later scan while its file still matches.
///
/// Returns an error only when the pattern itself is invalid; per-candidate
/// failures are logged and skipped.
pub async fn run_discovery(
    source_glob: String,
    settings: DiscoverySettings,
    tailer_config: TailerConfig,
    report_tx: mpsc::Sender<CompletedReport>,
) -> Result<()> {
    let mut active_tailers: HashMap<PathBuf, JoinHandle<()>> = HashMap::new();
    let marker = settings.source_marker.to_lowercase();
    let scan_interval = settings.scan_interval();

    info!(
        pattern = %source_glob,
        marker = %settings.source_marker,
        suffix = %settings.source_suffix,
        "discovery loop started"
    );

    loop {
        let entries = glob(&source_glob)
            .with_context(|| format!("invalid source glob pattern {source_glob}"))?;

        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable glob entry");
                    continue;
                }
            };
            if !is_candidate(&path, &marker, &settings.source_suffix) {
                continue;
            }
            spawn_tailer_if_needed(
                &mut active_tailers,
                path,
                tailer_config.clone(),
                report_tx.clone(),
            );
        }

        sleep(scan_interval).await;
    }
}

/// A candidate is a file whose path contains the device-family marker
/// (case-insensitive) and carries the expected suffix.
fn is_candidate(path: &Path, lowercase_marker: &str, suffix: &str) -> bool {
    if path.is_dir() {
        return false;
    }
    let path_str = path.to_string_lossy();
    path_str.to_lowercase().contains(lowercase_marker) && path_str.ends_with(suffix)
}

fn spawn_tailer_if_needed(
    active_tailers: &mut HashMap<PathBuf, JoinHandle<()>>,
    path: PathBuf,
    tailer_config: TailerConfig,
    report_tx: mpsc::Sender<CompletedReport>,
) {
    if let Some(handle) = active_tailers.get(&path) {
        if handle.is_finished() {
            warn!(path = %path.display(), "tailer task exited; restarting");
            active_tailers.remove(&path);
        } else {
            return;
        }
    }

    info!(path = %path.display(), "starting tailer for discovered source");

    let tail_path = path.clone();
    let handle = tokio::spawn(async move {
        if let Err(err) = tail_file(tail_path.clone(), tailer_config, report_tx).await {
            error!(
                error = %err,
                path = %tail_path.display(),
                "tailer terminated with error"
            );
        }
    });

    active_tailers.insert(path, handle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_requires_marker_and_suffix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let touch = |name: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, b"").expect("create file");
            path
        };

        assert!(is_candidate(&touch("idrac-7XYZ.log"), "idrac", ".log"));
        assert!(is_candidate(&touch("IDRAC-upper.log"), "idrac", ".log"));
        assert!(!is_candidate(&touch("switch-1.log"), "idrac", ".log"));
        assert!(!is_candidate(&touch("idrac-7XYZ.log.1"), "idrac", ".log"));
    }

    #[test]
    fn marker_may_appear_in_a_parent_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("idrac-hosts");
        std::fs::create_dir(&nested).expect("create dir");
        let path = nested.join("server42.log");
        std::fs::write(&path, b"").expect("create file");

        assert!(is_candidate(&path, "idrac", ".log"));
    }

    #[test]
    fn directories_are_never_candidates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("idrac-logs.log");
        std::fs::create_dir(&nested).expect("create dir");

        assert!(!is_candidate(&nested, "idrac", ".log"));
    }
}
