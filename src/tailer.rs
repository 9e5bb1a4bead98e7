use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::parser::LineParser;
use crate::reassembly::{CompletedReport, ReassemblyTable};

const MAX_READ_CHUNK_BYTES: usize = 1024 * 1024;

/// Tuning knobs for one file tailer.
#[derive(Debug, Clone)]
pub struct TailerConfig {
    /// Sleep between polls of the file for new bytes.
    pub poll_interval: Duration,
    /// How long the file may stay silent before the handle is assumed stale
    /// (rotated underneath us) and reopened.
    pub stall_timeout: Duration,
}

/// Tail `path` until the process exits, feeding every complete line through
/// the fragment parser into a task-owned reassembly table and sending each
/// completed report into `report_tx`.
///
/// The tailer starts at end-of-file: content already present when it opens
/// the file is never reprocessed. A returned error means the path became
/// unreadable; the caller owns the decision to log or respawn.
pub async fn tail_file(
    path: PathBuf,
    config: TailerConfig,
    report_tx: mpsc::Sender<CompletedReport>,
) -> Result<()> {
    let mut file = fs::File::open(&path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut read_offset = file
        .seek(SeekFrom::End(0))
        .await
        .with_context(|| format!("failed to seek {} to end", path.display()))?;

    let parser = LineParser::new();
    let mut table = ReassemblyTable::new();
    let mut line_buffer: Vec<u8> = Vec::new();
    let mut last_activity = Instant::now();

    info!(path = %path.display(), offset = read_offset, "starting tailer at end of file");

    loop {
        let metadata = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) => {
                debug!(
                    error = %err,
                    path = %path.display(),
                    "metadata unavailable; retrying"
                );
                sleep(config.poll_interval).await;
                continue;
            }
        };
        let file_size = metadata.len();

        if file_size < read_offset {
            warn!(
                path = %path.display(),
                previous_offset = read_offset,
                current_size = file_size,
                "file truncated or rotated; reopening from start"
            );
            file = fs::File::open(&path)
                .await
                .with_context(|| format!("failed to reopen {}", path.display()))?;
            read_offset = 0;
            line_buffer.clear();
            last_activity = Instant::now();
            continue;
        }

        if file_size > read_offset {
            let buffer = read_appended_bytes(&mut file, &path, file_size - read_offset).await?;
            if !buffer.is_empty() {
                read_offset += buffer.len() as u64;
                last_activity = Instant::now();
                line_buffer.extend_from_slice(&buffer);

                for line in split_complete_lines(&mut line_buffer) {
                    let Some(fragment) = parser.parse_line(&line) else {
                        continue;
                    };
                    if let Some(report) = table.ingest(fragment) {
                        info!(
                            source = %report.source_id,
                            report_index = report.report_index,
                            payload_bytes = report.payload.len(),
                            "report reassembled"
                        );
                        if report_tx.send(report).await.is_err() {
                            warn!(path = %path.display(), "report channel closed; stopping tailer");
                            return Ok(());
                        }
                    }
                }
            }
        } else if last_activity.elapsed() >= config.stall_timeout {
            info!(
                path = %path.display(),
                stalled_secs = last_activity.elapsed().as_secs(),
                pending_reports = table.pending_len(),
                "no new data within stall timeout; reopening file"
            );
            file = fs::File::open(&path)
                .await
                .with_context(|| format!("failed to reopen {} after stall", path.display()))?;
            let reopened_size = file
                .metadata()
                .await
                .with_context(|| format!("failed to stat reopened {}", path.display()))?
                .len();
            if reopened_size < read_offset {
                // The path now names a fresh file; read it from the top.
                read_offset = 0;
                line_buffer.clear();
            } else {
                file.seek(SeekFrom::Start(read_offset))
                    .await
                    .with_context(|| format!("failed to seek reopened {}", path.display()))?;
            }
            last_activity = Instant::now();
        }

        sleep(config.poll_interval).await;
    }
}

async fn read_appended_bytes(
    file: &mut fs::File,
    path: &PathBuf,
    bytes_available: u64,
) -> Result<Vec<u8>> {
    let bytes_to_read = bytes_available.min(MAX_READ_CHUNK_BYTES as u64) as usize;
    let mut buffer = vec![0u8; bytes_to_read];
    let mut total_read = 0usize;
    while total_read < bytes_to_read {
        let bytes_read = file
            .read(&mut buffer[total_read..])
            .await
            .with_context(|| format!("failed to read from {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        total_read += bytes_read;
    }
    buffer.truncate(total_read);
    Ok(buffer)
}

/// Remove every complete line from `buffer` and return them as strings; a
/// trailing partial line stays buffered for the next read. Empty lines are
/// dropped, and a trailing carriage return is stripped so CRLF input frames
/// the same as LF.
fn split_complete_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let Some(last_newline) = buffer.iter().rposition(|byte| *byte == b'\n') else {
        return Vec::new();
    };
    let complete: Vec<u8> = buffer.drain(..=last_newline).collect();
    complete
        .split(|byte| *byte == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect()
}
