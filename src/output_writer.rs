use anyhow::{Context, Result};
use serde_json::Value;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::reassembly::CompletedReport;

/// Persists reassembled reports under `<destination_root>/<source>/`.
///
/// The destination tree is append-only; directory creation tolerates
/// concurrent attempts from other writer invocations.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    destination_root: PathBuf,
}

impl ReportWriter {
    pub fn new(destination_root: PathBuf) -> Self {
        Self { destination_root }
    }

    fn sanitize_component(component: &str) -> String {
        component
            .chars()
            .map(|ch| match ch {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => ch,
                _ => '_',
            })
            .collect()
    }

    /// Field lookup tolerating numeric values; devices report `ReportSequence`
    /// as either a string or a bare number depending on firmware.
    fn string_field(report: &Value, key: &str, default: &str) -> String {
        match report.get(key) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Number(number)) => number.to_string(),
            _ => default.to_string(),
        }
    }

    fn report_file_name(report: &Value) -> String {
        let id = Self::string_field(report, "Id", "UnknownId");
        let sequence = Self::string_field(report, "ReportSequence", "00000");
        // Colons are invalid in path segments on some platforms.
        let timestamp = Self::string_field(report, "Timestamp", "00000").replace(':', "-");
        format!(
            "{}_{}_{}.json",
            Self::sanitize_component(&id),
            Self::sanitize_component(&sequence),
            Self::sanitize_component(&timestamp)
        )
    }

    /// Write one reassembled report.
    ///
    /// A payload that does not parse as JSON is logged and dropped without an
    /// artifact; only an unwritable destination surfaces as an error.
    pub async fn write_report(&self, report: CompletedReport) -> Result<()> {
        let parsed: Value = match serde_json::from_str(&report.payload) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    error = %err,
                    source = %report.source_id,
                    report_index = report.report_index,
                    payload_bytes = report.payload.len(),
                    "reassembled payload is not valid JSON; dropping report"
                );
                return Ok(());
            }
        };

        let directory = self
            .destination_root
            .join(Self::sanitize_component(&report.source_id));
        fs::create_dir_all(&directory)
            .await
            .with_context(|| format!("failed to create report directory {}", directory.display()))?;

        let filename = Self::report_file_name(&parsed);
        let final_path = directory.join(&filename);
        let temp_path = directory.join(format!("{}.{}.tmp", filename, Uuid::new_v4()));

        let serialized =
            serde_json::to_vec(&parsed).context("failed to re-serialize report payload")?;

        fs::write(&temp_path, &serialized)
            .await
            .with_context(|| format!("failed to write {}", temp_path.display()))?;

        fs::rename(&temp_path, &final_path).await.with_context(|| {
            format!(
                "failed to rename {} to {}",
                temp_path.display(),
                final_path.display()
            )
        })?;

        debug!(
            source = %report.source_id,
            report_index = report.report_index,
            output = %final_path.display(),
            "persisted reassembled report"
        );

        Ok(())
    }
}

/// Drain completed reports from the tailer tasks until every sender is gone.
///
/// Persistence failures are logged and the report dropped; there is no retry
/// queue, and a failed write never stops the writer.
pub async fn run_writer(writer: ReportWriter, mut report_rx: mpsc::Receiver<CompletedReport>) {
    while let Some(report) = report_rx.recv().await {
        let source = report.source_id.clone();
        let report_index = report.report_index;
        if let Err(err) = writer.write_report(report).await {
            error!(
                error = %err,
                source = %source,
                report_index,
                "failed to persist report"
            );
        }
    }
    debug!("report channel closed; writer task exiting");
}
