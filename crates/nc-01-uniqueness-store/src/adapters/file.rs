//! # File-backed Durable Log
//!
//! Frame format, one frame per committed request:
//!
//! ```text
//! [len: u32 LE][crc32: u32 LE][bincode(Vec<ConsumingRecord>)]
//! ```
//!
//! The file is held under an exclusive `fs2` lock for the lifetime of the
//! adapter. A torn or corrupt trailing frame (crash mid-append) is truncated
//! on open; a corrupt frame followed by valid data is reported as an error.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::Mutex;
use shared_types::ConsumingRecord;
use tracing::{info, warn};

use crate::domain::errors::LogError;
use crate::ports::DurableLog;

const FRAME_HEADER_LEN: usize = 8;

/// Append-only record log on local disk.
pub struct FileDurableLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl FileDurableLog {
    /// Open (or create) the log at `path`, lock it and recover its tail.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        file.try_lock_exclusive().map_err(|_| LogError::Locked {
            path: path.display().to_string(),
        })?;

        let bytes = read_whole(&mut file)?;
        let scan = scan_frames(&bytes)?;
        if scan.valid_len < bytes.len() {
            warn!(
                "[nc-01] Truncating {} trailing byte(s) of torn frame in {}",
                bytes.len() - scan.valid_len,
                path.display()
            );
            file.set_len(scan.valid_len as u64)?;
            file.sync_all()?;
        }

        info!(
            "[nc-01] Opened durable log {} ({} record(s))",
            path.display(),
            scan.records.len()
        );

        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DurableLog for FileDurableLog {
    fn append_batch(&self, records: &[ConsumingRecord]) -> Result<(), LogError> {
        let body = bincode::serialize(records).map_err(|e| LogError::Encoding(e.to_string()))?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        frame.extend_from_slice(&body);

        let mut file = self.file.lock();
        file.write_all(&frame)?;
        file.sync_data()?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<ConsumingRecord>, LogError> {
        let mut file = self.file.lock();
        let bytes = read_whole(&mut file)?;
        Ok(scan_frames(&bytes)?.records)
    }
}

impl Drop for FileDurableLog {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&*self.file.lock());
    }
}

fn read_whole(file: &mut File) -> Result<Vec<u8>, LogError> {
    let mut bytes = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

struct FrameScan {
    records: Vec<ConsumingRecord>,
    valid_len: usize,
}

/// Decode frames until the first incomplete or corrupt one.
///
/// Only the final frame may be damaged.
fn scan_frames(bytes: &[u8]) -> Result<FrameScan, LogError> {
    let mut records = Vec::new();
    let mut cursor = 0;

    while cursor + FRAME_HEADER_LEN <= bytes.len() {
        let len = u32::from_le_bytes(header_word(bytes, cursor)) as usize;
        let crc = u32::from_le_bytes(header_word(bytes, cursor + 4));
        let start = cursor + FRAME_HEADER_LEN;
        let end = start + len;

        if end > bytes.len() {
            break;
        }
        let body = &bytes[start..end];
        if crc32fast::hash(body) != crc {
            if end < bytes.len() {
                return Err(LogError::Encoding(format!(
                    "checksum mismatch in frame at offset {}",
                    cursor
                )));
            }
            break;
        }
        let batch: Vec<ConsumingRecord> =
            bincode::deserialize(body).map_err(|e| LogError::Encoding(e.to_string()))?;
        records.extend(batch);
        cursor = end;
    }

    Ok(FrameScan {
        records,
        valid_len: cursor,
    })
}

fn header_word(bytes: &[u8], at: usize) -> [u8; 4] {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    word
}
