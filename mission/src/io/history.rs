//! Append-only JSONL mission history.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use tracing::{debug, instrument, warn};

use crate::core::types::MissionLogRecord;

/// Local wall-clock timestamp in the format stored on records.
pub fn timestamp_now() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheKey {
    len: u64,
    modified: Option<SystemTime>,
}

#[derive(Debug)]
struct Cached {
    key: CacheKey,
    records: Arc<Vec<MissionLogRecord>>,
}

/// Handle on the history file; reads are cached until the file changes.
#[derive(Debug)]
pub struct MissionLog {
    path: PathBuf,
    cache: Mutex<Option<Cached>>,
}

impl MissionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single JSON line.
    #[instrument(skip_all, fields(path = %self.path.display(), status = %record.status))]
    pub fn append(&self, record: &MissionLogRecord) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create history dir {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(record).context("serialize history record")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open history {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append history {}", self.path.display()))?;
        debug!("history record appended");
        Ok(())
    }

    /// All readable records in file order. A missing file is an empty history.
    pub fn records(&self) -> Result<Arc<Vec<MissionLogRecord>>> {
        let metadata = match fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Arc::new(Vec::new()));
            }
            Err(err) => {
                return Err(err).with_context(|| format!("stat history {}", self.path.display()));
            }
        };
        let key = CacheKey {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        };

        let mut cache = self
            .cache
            .lock()
            .map_err(|_| anyhow!("history cache lock poisoned"))?;
        if let Some(cached) = cache.as_ref()
            && cached.key == key
        {
            return Ok(Arc::clone(&cached.records));
        }

        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("read history {}", self.path.display()))?;
        let records = Arc::new(parse_history(&text));
        *cache = Some(Cached {
            key,
            records: Arc::clone(&records),
        });
        Ok(records)
    }
}

/// Parse JSONL history, skipping blank and malformed lines.
pub fn parse_history(text: &str) -> Vec<MissionLogRecord> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(line = idx + 1, err = %err, "skipping malformed history line");
                None
            }
        })
        .collect()
}

/// Fixed-width table of the history for terminal display.
pub fn render_table(records: &[MissionLogRecord]) -> String {
    let headers = ["Timestamp", "Model", "Agent", "Status", "Exit"];
    let rows = records
        .iter()
        .map(|record| {
            [
                record.timestamp.clone(),
                record.model_id.clone().unwrap_or_else(|| "-".to_string()),
                record.agent_name.clone().unwrap_or_else(|| "-".to_string()),
                record.status.to_string(),
                record
                    .exit_code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect::<Vec<_>>();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let format_row = |cells: &[String]| {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };
    out.push_str(&format_row(&headers.map(str::to_string)));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|width| "-".repeat(*width))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for row in &rows {
        out.push_str(&format_row(row));
        out.push('\n');
    }
    out
}
