//! Append-only JSON-lines file store.
//!
//! Each reading is appended as one line holding its wire frame, so the
//! file can be tailed or replayed with ordinary tools. History queries
//! read the file backwards from the end, so their cost follows the number
//! of readings asked for rather than the size of the file.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

use sensorhub_core::Reading;
use sensorhub_protocol::{decode_reading, encode_reading};

use super::{ReadingStore, StoreError};

/// Bytes read per step when scanning backwards for recent lines.
const TAIL_CHUNK: u64 = 8 * 1024;

/// Longest stored line kept while scanning; anything longer is corrupt.
const MAX_STORED_LINE: usize = 64 * 1024;

/// Durable store backed by a local file.
pub struct FileStore {
    path: PathBuf,
    /// Serializes appends so lines never interleave.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Creates a store writing to `path`, creating parent directories.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn decode_line(&self, raw: &[u8]) -> Option<Reading> {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Skipping non-UTF-8 stored line");
                return None;
            }
        };
        if line.is_empty() {
            return None;
        }
        match decode_reading(line) {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Skipping corrupt stored line");
                None
            }
        }
    }
}

#[async_trait]
impl ReadingStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn store(&self, reading: &Reading) -> Result<(), StoreError> {
        let mut line = encode_reading(reading).map_err(|e| StoreError::Encode(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Reading>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };
        let mut pos = file.metadata().await.map_err(|e| self.io_error(e))?.len();

        // Newest first until the final reverse.
        let mut readings = Vec::new();
        // Tail of a line that starts before `pos`.
        let mut carry: Vec<u8> = Vec::new();

        while pos > 0 && readings.len() < limit {
            let step = TAIL_CHUNK.min(pos);
            pos -= step;
            file.seek(SeekFrom::Start(pos))
                .await
                .map_err(|e| self.io_error(e))?;
            let mut chunk = vec![0u8; step as usize];
            file.read_exact(&mut chunk)
                .await
                .map_err(|e| self.io_error(e))?;
            chunk.extend_from_slice(&carry);

            let mut lines: Vec<&[u8]> = chunk.rsplit(|b| *b == b'\n').collect();
            let head = if pos > 0 { lines.pop() } else { None };

            for line in lines {
                if readings.len() == limit {
                    break;
                }
                if let Some(reading) = self.decode_line(line) {
                    readings.push(reading);
                }
            }

            carry = match head {
                Some(head) if head.len() > MAX_STORED_LINE => {
                    warn!(path = %self.path.display(), len = head.len(), "Skipping oversized stored line");
                    Vec::new()
                }
                Some(head) => head.to_vec(),
                None => Vec::new(),
            };
        }

        readings.reverse();
        Ok(readings)
    }
}
