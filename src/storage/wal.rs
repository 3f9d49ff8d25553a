use crc::{Crc, CRC_32_ISCSI};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::storage::data::Row;

const WAL_EXTENSION: &str = "wal";
/// CRC bytes plus the trailing newline that close every record
const RECORD_TRAILER_LEN: usize = 5;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid WAL entry: {0}")]
    InvalidEntry(String),
    #[error("Corrupted WAL entry at offset {offset}: CRC mismatch")]
    CorruptedEntry { offset: u64 },
    #[error("WAL has been destroyed")]
    Destroyed,
}

/// The operation a WAL entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalOperation {
    Insert,
}

/// One durable record; one entry per `insert_rows` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub operation: WalOperation,
    pub rows: Vec<Row>,
}

impl WalEntry {
    pub fn insert(rows: Vec<Row>) -> Self {
        Self {
            operation: WalOperation::Insert,
            rows,
        }
    }
}

/// Durability primitive consumed by memory partitions.
///
/// `append` must not return before the entry is durable. `read_entry`
/// yields entries in append order and `Ok(None)` once the log is
/// exhausted. Reads and appends are only interleaved during recovery,
/// which finishes before normal writes begin.
pub trait Wal: Send + Sync {
    /// Durably appends an entry, returning its offset in the log
    fn append(&self, entry: &WalEntry) -> Result<u64, WalError>;

    /// Reads the next entry, or `None` at end of log
    fn read_entry(&self) -> Result<Option<WalEntry>, WalError>;

    /// Discards every entry
    fn truncate(&self) -> Result<(), WalError>;

    /// Permanently releases the underlying resource
    fn destroy(&self) -> Result<(), WalError>;

    /// Identity of the log, for diagnostics
    fn filename(&self) -> String;
}

/// Configuration for file-backed logs
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// fsync the file after every append and truncate
    pub sync_on_append: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            sync_on_append: true,
        }
    }
}

impl WalConfig {
    pub fn with_sync_on_append(mut self, sync: bool) -> Self {
        self.sync_on_append = sync;
        self
    }
}

struct FileWalState {
    /// `None` once the log has been destroyed
    file: Option<File>,
    /// Offset of the next record `read_entry` will return
    read_offset: u64,
}

/// A write-ahead log kept in a single file.
///
/// Each record is the JSON encoding of a [`WalEntry`] on one line,
/// followed by the little-endian CRC-32 of that line and a newline.
pub struct FileWal {
    path: PathBuf,
    config: WalConfig,
    state: Mutex<FileWalState>,
    crc: Crc<u32>,
}

impl FileWal {
    /// Opens the log at `path`, creating it if it does not exist.
    ///
    /// A record torn by a crash during its append is cut off, so later
    /// appends start on a record boundary. Complete records are kept even
    /// when their checksum fails; `read_entry` reports those.
    pub fn open<P: AsRef<Path>>(path: P, config: WalConfig) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let complete = complete_records_len(&bytes);
        if complete < bytes.len() {
            warn!(
                path = %path.display(),
                offset = complete,
                dropped = bytes.len() - complete,
                "Truncating torn record at end of WAL"
            );
            file.set_len(complete as u64)?;
            if config.sync_on_append {
                file.sync_all()?;
            }
        }

        Ok(Self {
            path,
            config,
            state: Mutex::new(FileWalState {
                file: Some(file),
                read_offset: 0,
            }),
            crc: Crc::<u32>::new(&CRC_32_ISCSI),
        })
    }

    /// Creates a fresh, uniquely named log inside `directory`
    pub fn create_in<P: AsRef<Path>>(directory: P, config: WalConfig) -> Result<Self, WalError> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory)?;
        let filename = format!("partition_{}.{}", Uuid::new_v4(), WAL_EXTENSION);
        Self::open(directory.join(filename), config)
    }

    /// Returns the path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn checksum(&self, bytes: &[u8]) -> u32 {
        let mut digest = self.crc.digest();
        digest.update(bytes);
        digest.finalize()
    }
}

/// Length of the prefix of `bytes` made of whole records
fn complete_records_len(bytes: &[u8]) -> usize {
    let mut offset = 0;
    while let Some(newline) = bytes[offset..].iter().position(|&b| b == b'\n') {
        let end = offset + newline + 1 + RECORD_TRAILER_LEN;
        if end > bytes.len() {
            break;
        }
        offset = end;
    }
    offset
}

impl Wal for FileWal {
    fn append(&self, entry: &WalEntry) -> Result<u64, WalError> {
        let mut record = serde_json::to_vec(entry)?;
        let crc = self.checksum(&record);
        record.push(b'\n');
        record.extend_from_slice(&crc.to_le_bytes());
        record.push(b'\n');

        let mut state = self.state.lock();
        let file = state.file.as_mut().ok_or(WalError::Destroyed)?;

        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(&record)?;
        file.flush()?;
        if self.config.sync_on_append {
            file.sync_data()?;
        }

        Ok(offset)
    }

    fn read_entry(&self) -> Result<Option<WalEntry>, WalError> {
        let mut state = self.state.lock();
        let offset = state.read_offset;
        let file = state.file.as_mut().ok_or(WalError::Destroyed)?;

        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(&mut *file);

        let mut line = Vec::new();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            return Ok(None);
        }
        if line.last() != Some(&b'\n') {
            warn!(path = %self.path.display(), offset, "Ignoring torn record at end of WAL");
            return Ok(None);
        }

        let mut trailer = [0u8; RECORD_TRAILER_LEN];
        match reader.read_exact(&mut trailer) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!(path = %self.path.display(), offset, "Ignoring torn record at end of WAL");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }
        drop(reader);

        if trailer[RECORD_TRAILER_LEN - 1] != b'\n' {
            return Err(WalError::InvalidEntry(format!(
                "missing record terminator at offset {}",
                offset
            )));
        }

        let body = &line[..line.len() - 1];
        let expected_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if self.checksum(body) != expected_crc {
            return Err(WalError::CorruptedEntry { offset });
        }

        let entry: WalEntry = serde_json::from_slice(body)?;
        state.read_offset = offset + (line.len() + RECORD_TRAILER_LEN) as u64;

        Ok(Some(entry))
    }

    fn truncate(&self) -> Result<(), WalError> {
        let mut state = self.state.lock();
        let file = state.file.as_mut().ok_or(WalError::Destroyed)?;

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        if self.config.sync_on_append {
            file.sync_all()?;
        }
        state.read_offset = 0;

        Ok(())
    }

    fn destroy(&self) -> Result<(), WalError> {
        let mut state = self.state.lock();
        if state.file.take().is_none() {
            return Err(WalError::Destroyed);
        }

        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn filename(&self) -> String {
        self.path.display().to_string()
    }
}

impl fmt::Debug for FileWal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self
            .state
            .try_lock()
            .map(|state| {
                if state.file.is_some() {
                    format!("open, read_offset: {}", state.read_offset)
                } else {
                    "destroyed".to_string()
                }
            })
            .unwrap_or_else(|| "Locked".to_string());

        f.debug_struct("FileWal")
            .field("path", &self.path)
            .field("state", &state)
            .field("sync_on_append", &self.config.sync_on_append)
            .finish()
    }
}

#[derive(Default)]
struct MemoryWalState {
    entries: Vec<Vec<u8>>,
    cursor: usize,
    destroyed: bool,
    fail_appends: bool,
    fail_read_at: Option<usize>,
}

/// A write-ahead log held in process memory.
///
/// Entries are stored serialized, so a partition recovered from a
/// `MemoryWal` sees exactly what was appended. Failures can be injected
/// to exercise the error paths of callers.
pub struct MemoryWal {
    name: String,
    state: Mutex<MemoryWalState>,
}

impl MemoryWal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryWalState::default()),
        }
    }

    /// Makes every following append fail until reset
    pub fn fail_appends(&self, fail: bool) {
        self.state.lock().fail_appends = fail;
    }

    /// Makes the read of the entry at `index` fail
    pub fn fail_read_at(&self, index: Option<usize>) {
        self.state.lock().fail_read_at = index;
    }

    /// Number of entries currently held
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// Moves the read cursor back to the first entry
    pub fn rewind(&self) {
        self.state.lock().cursor = 0;
    }
}

impl Wal for MemoryWal {
    fn append(&self, entry: &WalEntry) -> Result<u64, WalError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(WalError::Destroyed);
        }
        if state.fail_appends {
            return Err(WalError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected append failure",
            )));
        }

        state.entries.push(serde_json::to_vec(entry)?);
        Ok((state.entries.len() - 1) as u64)
    }

    fn read_entry(&self) -> Result<Option<WalEntry>, WalError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(WalError::Destroyed);
        }
        if state.fail_read_at == Some(state.cursor) {
            return Err(WalError::InvalidEntry(format!(
                "injected read failure at entry {}",
                state.cursor
            )));
        }

        let Some(bytes) = state.entries.get(state.cursor) else {
            return Ok(None);
        };
        let entry = serde_json::from_slice(bytes)?;
        state.cursor += 1;

        Ok(Some(entry))
    }

    fn truncate(&self) -> Result<(), WalError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(WalError::Destroyed);
        }
        state.entries.clear();
        state.cursor = 0;
        Ok(())
    }

    fn destroy(&self) -> Result<(), WalError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(WalError::Destroyed);
        }
        state.entries.clear();
        state.destroyed = true;
        Ok(())
    }

    fn filename(&self) -> String {
        self.name.clone()
    }
}

impl fmt::Debug for MemoryWal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryWal")
            .field("name", &self.name)
            .field("entries", &self.len())
            .finish()
    }
}
