use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::blocklist::{BlockRecord, BlocklistBackend};
use crate::error::PersistenceError;

/// One line of the journal.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum JournalLine {
    Removed { ip: String, removed: bool },
    Upsert(BlockRecord),
}

/// Append-only JSON-lines blocklist journal.
///
/// Every write appends one line; the file is only rewritten by
/// `purge_expired`, which compacts it to the live set via a temp file and an
/// atomic rename. Later lines for an identity supersede earlier ones.
///
/// A legacy whole-file JSON array (`[{"ip", "blockReason", "blockedUntil"}]`)
/// is accepted on load. Lines appended after it are folded on top of it, and
/// the next compaction converts the file to plain journal lines.
pub struct JournalBackend {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JournalBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(None),
        }
    }

    fn append(&self, line: &JournalLine) -> Result<(), PersistenceError> {
        let mut guard = self.writer.lock();
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            *guard = Some(BufWriter::new(file));
        }

        if let Some(writer) = guard.as_mut() {
            serde_json::to_writer(&mut *writer, line)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Fold the file into the current record set, in first-seen order.
    ///
    /// A legacy array may be followed by journal lines appended after it was
    /// loaded; both parts are folded. An unparseable legacy array is an error
    /// so compaction never rewrites over it.
    fn read_records(&self) -> Result<Vec<BlockRecord>, PersistenceError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut set = RecordSet::default();
        let mut lines = content.as_str();

        if content.trim_start().starts_with('[') {
            let mut stream = serde_json::Deserializer::from_str(&content).into_iter::<Vec<BlockRecord>>();
            match stream.next() {
                Some(Ok(records)) => {
                    for record in records {
                        set.upsert(record);
                    }
                    lines = &content[stream.byte_offset()..];
                }
                Some(Err(e)) => {
                    warn!(path = %self.path.display(), error = %e, "Corrupt legacy blocklist file");
                    return Err(e.into());
                }
                None => lines = "",
            }
        }

        for (lineno, raw) in lines.lines().enumerate() {
            if raw.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalLine>(raw) {
                Ok(JournalLine::Upsert(record)) => set.upsert(record),
                Ok(JournalLine::Removed { ip, removed }) => {
                    if removed {
                        set.remove(&ip);
                    }
                }
                Err(e) => {
                    warn!(path = %self.path.display(), line = lineno + 1, error = %e, "Skipping corrupt journal line");
                }
            }
        }

        Ok(set.into_records())
    }

    fn rewrite(&self, records: &[BlockRecord]) -> Result<(), PersistenceError> {
        let tmp = self.path.with_extension("compact");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for record in records {
                serde_json::to_writer(&mut out, record)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Latest record per identity, remembering first-seen order.
#[derive(Default)]
struct RecordSet {
    order: Vec<String>,
    current: HashMap<String, BlockRecord>,
}

impl RecordSet {
    fn upsert(&mut self, record: BlockRecord) {
        if !self.current.contains_key(&record.ip) {
            self.order.push(record.ip.clone());
        }
        self.current.insert(record.ip.clone(), record);
    }

    fn remove(&mut self, ip: &str) {
        self.current.remove(ip);
    }

    /// An identity removed and re-added keeps its first position.
    fn into_records(mut self) -> Vec<BlockRecord> {
        self.order
            .into_iter()
            .filter_map(|ip| self.current.remove(&ip))
            .collect()
    }
}

impl BlocklistBackend for JournalBackend {
    fn load(&self) -> Result<Vec<BlockRecord>, PersistenceError> {
        let _guard = self.writer.lock();
        self.read_records()
    }

    fn upsert(&self, record: &BlockRecord) -> Result<(), PersistenceError> {
        self.append(&JournalLine::Upsert(record.clone()))
    }

    fn remove(&self, ip: &str) -> Result<(), PersistenceError> {
        self.append(&JournalLine::Removed {
            ip: ip.to_string(),
            removed: true,
        })
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, PersistenceError> {
        // Hold the writer lock across read + rewrite so no append lands in
        // the file being replaced, and drop the handle to the old inode.
        let mut guard = self.writer.lock();
        if !self.path.exists() {
            return Ok(0);
        }
        let records = self.read_records()?;
        let before = records.len();
        let live: Vec<BlockRecord> = records
            .into_iter()
            .filter(|r| r.blocked_until.map_or(true, |until| now < until))
            .collect();

        self.rewrite(&live)?;
        *guard = None;

        let removed = before - live.len();
        debug!(path = %self.path.display(), kept = live.len(), removed, "Compacted blocklist journal");
        Ok(removed)
    }
}
