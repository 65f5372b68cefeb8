//! Checkpoint persistence and the append-only ledger log
//!
//! Checkpoints are whole-state snapshots in JSON or versioned bincode. The
//! ledger log is a JSON-lines file of registrations and comparisons that can
//! be appended to as labels arrive and replayed into a fresh store.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::state::{PipelineCheckpoint, CHECKPOINT_VERSION};
use crate::error::CheckpointError;
use crate::ledger::{Candidate, Comparison, ComparisonStore};

const BINARY_MAGIC: &[u8; 4] = b"ARLH";

/// Format for checkpoint serialization
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointFormat {
    /// JSON format (human-readable, larger)
    Json,
    /// Binary format (compact, fast)
    #[default]
    Binary,
}

impl CheckpointFormat {
    fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Binary => "ckpt",
        }
    }
}

/// Save a checkpoint to a file
pub fn save_checkpoint(
    checkpoint: &PipelineCheckpoint,
    path: impl AsRef<Path>,
    format: CheckpointFormat,
) -> Result<(), CheckpointError> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);

    match format {
        CheckpointFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, checkpoint)
                .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        }
        CheckpointFormat::Binary => {
            writer.write_all(&CHECKPOINT_VERSION.to_le_bytes())?;
            writer.write_all(BINARY_MAGIC)?;
            bincode::serialize_into(&mut writer, checkpoint)
                .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Load a checkpoint from a file, detecting its format
pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<PipelineCheckpoint, CheckpointError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CheckpointError::NotFound(path.display().to_string()));
    }

    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    let checkpoint: PipelineCheckpoint = if bytes.len() >= 8 && &bytes[4..8] == BINARY_MAGIC {
        let version = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if version > CHECKPOINT_VERSION {
            return Err(CheckpointError::VersionTooNew(version));
        }
        bincode::deserialize(&bytes[8..])
            .map_err(|e| CheckpointError::Deserialization(e.to_string()))?
    } else {
        serde_json::from_slice(&bytes)
            .map_err(|e| CheckpointError::Deserialization(e.to_string()))?
    };

    if !checkpoint.is_compatible() {
        return Err(CheckpointError::VersionTooNew(checkpoint.version));
    }
    Ok(checkpoint)
}

/// Checkpoint manager for periodic saving with rotation
pub struct CheckpointManager {
    /// Directory for checkpoint files
    pub directory: PathBuf,
    /// Base filename for checkpoints
    pub base_name: String,
    /// Serialization format
    pub format: CheckpointFormat,
    /// How many checkpoints to keep
    pub keep_n: usize,
    /// Save interval in rounds
    pub interval: u64,
}

impl CheckpointManager {
    /// Create a new checkpoint manager
    pub fn new(directory: impl Into<PathBuf>, base_name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            base_name: base_name.into(),
            format: CheckpointFormat::Binary,
            keep_n: 3,
            interval: 10,
        }
    }

    /// Set the serialization format
    pub fn with_format(mut self, format: CheckpointFormat) -> Self {
        self.format = format;
        self
    }

    /// Set how many checkpoints to keep
    pub fn keep(mut self, n: usize) -> Self {
        self.keep_n = n.max(1);
        self
    }

    /// Set the save interval
    pub fn every(mut self, rounds: u64) -> Self {
        self.interval = rounds.max(1);
        self
    }

    /// Check if a checkpoint should be saved after this round
    pub fn should_save(&self, round: u64) -> bool {
        round > 0 && round % self.interval == 0
    }

    /// Path of the checkpoint for a round
    pub fn path_for(&self, round: u64) -> PathBuf {
        self.directory.join(format!(
            "{}_{:06}.{}",
            self.base_name,
            round,
            self.format.extension()
        ))
    }

    /// Save a checkpoint and drop the oldest beyond `keep_n`
    pub fn save(&self, checkpoint: &PipelineCheckpoint) -> Result<PathBuf, CheckpointError> {
        std::fs::create_dir_all(&self.directory)?;
        let path = self.path_for(checkpoint.round);
        save_checkpoint(checkpoint, &path, self.format)?;

        let saved = self.saved_rounds()?;
        if saved.len() > self.keep_n {
            for round in &saved[..saved.len() - self.keep_n] {
                let old = self.path_for(*round);
                if let Err(e) = std::fs::remove_file(&old) {
                    tracing::warn!(path = %old.display(), error = %e, "failed to rotate checkpoint");
                }
            }
        }

        tracing::debug!(round = checkpoint.round, path = %path.display(), "checkpoint saved");
        Ok(path)
    }

    /// Load the newest readable checkpoint, if any
    pub fn load_latest(&self) -> Result<Option<PipelineCheckpoint>, CheckpointError> {
        if !self.directory.exists() {
            return Ok(None);
        }
        for round in self.saved_rounds()?.into_iter().rev() {
            let path = self.path_for(round);
            match load_checkpoint(&path) {
                Ok(checkpoint) => return Ok(Some(checkpoint)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint");
                }
            }
        }
        Ok(None)
    }

    /// Rounds with a checkpoint on disk, oldest first
    fn saved_rounds(&self) -> Result<Vec<u64>, CheckpointError> {
        let prefix = format!("{}_", self.base_name);
        let suffix = format!(".{}", self.format.extension());
        let mut rounds: Vec<u64> = std::fs::read_dir(&self.directory)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_prefix(&prefix)?
                    .strip_suffix(&suffix)?
                    .parse()
                    .ok()
            })
            .collect();
        rounds.sort_unstable();
        Ok(rounds)
    }
}

/// One line of the ledger log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum LogRecord {
    /// A candidate was registered
    Register(Candidate),
    /// A comparison was appended
    Compare(Comparison),
}

/// Append-only JSON-lines log of ledger events
#[derive(Clone, Debug)]
pub struct LedgerLog {
    path: PathBuf,
}

impl LedgerLog {
    /// Log at `path`; the file is created on first append
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record
    pub fn append(&self, record: &LogRecord) -> Result<(), CheckpointError> {
        self.append_all(std::iter::once(record))
    }

    /// Append records in order
    pub fn append_all<'a>(
        &self,
        records: impl IntoIterator<Item = &'a LogRecord>,
    ) -> Result<(), CheckpointError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            serde_json::to_writer(&mut writer, record)
                .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Overwrite the log with the full contents of a store
    ///
    /// Registrations are written first, then comparisons in ledger order.
    pub fn write_store(&self, store: &ComparisonStore) -> Result<usize, CheckpointError> {
        let records: Vec<LogRecord> = store
            .candidates()
            .cloned()
            .map(LogRecord::Register)
            .chain(store.comparisons().iter().cloned().map(LogRecord::Compare))
            .collect();

        File::create(&self.path)?;
        self.append_all(&records)?;
        Ok(records.len())
    }

    /// Read every record; blank lines are skipped
    pub fn read(&self) -> Result<Vec<LogRecord>, CheckpointError> {
        if !self.path.exists() {
            return Err(CheckpointError::NotFound(self.path.display().to_string()));
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| {
                CheckpointError::Corrupted(format!("line {}: {}", line_no + 1, e))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Rebuild a store by applying every record in order
    ///
    /// The error index is the position of the offending record.
    pub fn replay(&self) -> Result<ComparisonStore, CheckpointError> {
        let mut store = ComparisonStore::new();
        for (index, record) in self.read()?.into_iter().enumerate() {
            let applied = match record {
                LogRecord::Register(candidate) => store.register(candidate),
                LogRecord::Compare(comparison) => store.restore(comparison).map(|_| ()),
            };
            applied.map_err(|source| CheckpointError::Replay { index, source })?;
        }
        Ok(store)
    }
}
