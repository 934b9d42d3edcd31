//! JSON persistence for Graze history logs.
//!
//! A saved history is a JSON array of snapshots, each a square matrix of
//! `{"grass": 0|1, "herbivore": energy}` records. Loading only checks that
//! the bytes decode into that shape; cross-snapshot validation (uniform
//! grid size, non-empty log) stays with [`graze_core::WorldState`] so a
//! rejected file can never leave a world partially replaced.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use graze_core::{HistoryLog, Snapshot};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by history persistence.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying byte source or sink failed.
    #[error("history I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The bytes are not parseable JSON at all.
    #[error("history is not valid JSON: {0}")]
    Unreadable(#[source] serde_json::Error),
    /// The JSON parsed but does not describe an array of snapshots.
    #[error("history has the wrong shape: {0}")]
    Malformed(String),
}

/// Serialize every stored snapshot of `history` to `writer` as one JSON
/// array.
pub fn save_history<W: Write>(mut writer: W, history: &HistoryLog) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec(history.snapshots())
        .map_err(|err| StorageError::Malformed(err.to_string()))?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Deserialize a snapshot sequence from `reader`.
///
/// Distinguishes unreadable bytes (not JSON) from well-formed JSON of the
/// wrong shape, so callers can report the two separately.
pub fn load_history<R: Read>(mut reader: R) -> Result<Vec<Snapshot>, StorageError> {
    let mut raw = String::new();
    reader.read_to_string(&mut raw)?;
    let value: Value = serde_json::from_str(&raw).map_err(StorageError::Unreadable)?;
    if !value.is_array() {
        return Err(StorageError::Malformed(
            "expected a top-level JSON array of snapshots".to_owned(),
        ));
    }
    serde_json::from_value(value).map_err(|err| StorageError::Malformed(err.to_string()))
}

/// Write `history` to the file at `path`, creating or truncating it.
pub fn save_history_file(path: &Path, history: &HistoryLog) -> Result<(), StorageError> {
    let file = File::create(path)?;
    save_history(BufWriter::new(file), history)
}

/// Read a snapshot sequence from the file at `path`.
pub fn load_history_file(path: &Path) -> Result<Vec<Snapshot>, StorageError> {
    let file = File::open(path)?;
    load_history(BufReader::new(file))
}
