use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use super::AuditEvent;
use crate::error::{FleetError, Result};

const JOURNAL_PREFIX: &str = "audit_";
const JOURNAL_EXT: &str = "jsonl";

/// Append-only JSONL journal, one file per process start
pub struct AuditJournal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl AuditJournal {
    /// Open a fresh journal file under `dir`, creating the directory if needed
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(journal_file_name(Utc::now()));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event and flush it to disk
    pub fn append(&mut self, event: &AuditEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

fn journal_file_name(now: DateTime<Utc>) -> String {
    format!(
        "{}{}.{}",
        JOURNAL_PREFIX,
        now.format("%Y%m%d_%H%M%S"),
        JOURNAL_EXT
    )
}

/// All journal files under `dir`, oldest first
pub fn journal_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension().map_or(false, |ext| ext == JOURNAL_EXT)
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with(JOURNAL_PREFIX))
        })
        .collect();
    // Timestamped names sort chronologically
    files.sort();
    Ok(files)
}

/// Read every event from every journal file under `dir`, oldest first.
///
/// Malformed lines are skipped with a warning.
pub fn read_journal(dir: &Path) -> Result<Vec<AuditEvent>> {
    let mut events = Vec::new();
    for path in journal_files(dir)? {
        let file = File::open(&path)
            .map_err(|e| FleetError::Persistence(format!("{}: {}", path.display(), e)))?;
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    file = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "Skipping malformed audit record"
                ),
            }
        }
    }
    events.sort_by_key(|e| e.timestamp);
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{EventType, Severity, Source};
    use chrono::TimeZone;

    #[test]
    fn test_file_name_format() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(journal_file_name(ts), "audit_20250304_050607.jsonl");
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = AuditJournal::open(dir.path()).unwrap();

        let first = AuditEvent::new(EventType::Stop, Severity::Warning, Source::Api, "bot_a", "stop_initiated");
        let second = AuditEvent::new(EventType::Trade, Severity::Info, Source::Bot, "ETH/USDT", "buy");
        journal.append(&first).unwrap();
        journal.append(&second).unwrap();

        // Garbage from a torn write must not hide the good records
        fs::OpenOptions::new()
            .append(true)
            .open(journal.path())
            .unwrap()
            .write_all(b"{not json\n")
            .unwrap();

        let events = read_journal(dir.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, first.id);
        assert_eq!(events[1].id, second.id);
    }

    #[test]
    fn test_missing_dir_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let events = read_journal(&dir.path().join("nope")).unwrap();
        assert!(events.is_empty());
    }
}
