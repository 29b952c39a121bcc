//! File backend: checksummed append-only journal
//!
//! Every `write_batch` becomes one journal record:
//!
//! ```text
//! +------------------+
//! | Record Length    | (u32 LE, includes this field and the checksum)
//! +------------------+
//! | Table            | (length-prefixed string)
//! +------------------+
//! | Op Count         | (u32 LE)
//! +------------------+
//! | Ops              | kind u8 (1 = put, 2 = delete), key, [value]
//! +------------------+
//! | Checksum         | (u32 LE, CRC32 over all preceding bytes)
//! +------------------+
//! ```
//!
//! On open the journal is replayed into a sorted in-memory image. A record
//! cut short at the very end of the file is the signature of a crash during
//! append: it is discarded and the file truncated. A complete record whose
//! checksum does not match is corruption and opening fails.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use tracing::{debug, warn};

use super::checksum::{compute_checksum, verify_checksum};
use super::errors::{StorageError, StorageResult};
use super::{apply_batch, scan_table, BatchOp, ScanRange, StorageBackend, Table};

const JOURNAL_FILE: &str = "journal.log";
const COMPACT_FILE: &str = "journal.compact";

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// Minimum record: length + table length + op count + checksum
const MIN_RECORD_SIZE: usize = 4 + 4 + 4 + 4;

struct Journal {
    file: File,
    offset: u64,
}

/// Durable backend over a single journal file in `data_dir`.
pub struct FileBackend {
    data_dir: PathBuf,
    journal: Mutex<Journal>,
    image: RwLock<HashMap<String, Table>>,
    sync_writes: bool,
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("data_dir", &self.data_dir)
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl FileBackend {
    /// Opens or creates `<data_dir>/journal.log` and replays it.
    ///
    /// With `sync_writes` every batch is fsynced; otherwise only `flush()`
    /// is a durability point.
    pub fn open(data_dir: &Path, sync_writes: bool) -> StorageResult<Self> {
        fs::create_dir_all(data_dir).map_err(|e| {
            StorageError::write_failed(
                format!("Failed to create data directory: {}", data_dir.display()),
                e,
            )
        })?;

        let journal_path = data_dir.join(JOURNAL_FILE);
        let (image, valid_length) = Self::replay(&journal_path)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&journal_path)
            .map_err(|e| {
                StorageError::write_failed(
                    format!("Failed to open journal: {}", journal_path.display()),
                    e,
                )
            })?;

        let file_length = file
            .metadata()
            .map_err(|e| StorageError::io_error("Failed to read journal metadata", e))?
            .len();
        if file_length > valid_length {
            warn!(
                path = %journal_path.display(),
                discarded_bytes = file_length - valid_length,
                "discarding torn journal tail"
            );
            file.set_len(valid_length)
                .map_err(|e| StorageError::write_failed("Failed to truncate torn journal tail", e))?;
            file.sync_all()
                .map_err(|e| StorageError::write_failed("fsync failed after truncation", e))?;
        }

        debug!(
            path = %journal_path.display(),
            tables = image.len(),
            bytes = valid_length,
            "journal replayed"
        );

        let mut journal = Journal {
            file,
            offset: valid_length,
        };
        Self::seek_to_end(&mut journal)?;

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            journal: Mutex::new(journal),
            image: RwLock::new(image),
            sync_writes,
        })
    }

    /// Returns the data directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn seek_to_end(journal: &mut Journal) -> StorageResult<()> {
        use std::io::{Seek, SeekFrom};
        journal
            .file
            .seek(SeekFrom::Start(journal.offset))
            .map_err(|e| StorageError::io_error("Failed to seek journal", e))?;
        Ok(())
    }

    /// Replays the journal; returns the image and the length of the valid prefix.
    fn replay(path: &Path) -> StorageResult<(HashMap<String, Table>, u64)> {
        let mut image: HashMap<String, Table> = HashMap::new();
        let data = match fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((image, 0)),
            Err(e) => return Err(StorageError::read_failed("Failed to read journal", e)),
        };

        let mut offset = 0usize;
        while offset < data.len() {
            let remaining = &data[offset..];
            if remaining.len() < 4 {
                break;
            }
            let record_length =
                u32::from_le_bytes([remaining[0], remaining[1], remaining[2], remaining[3]]) as usize;
            if record_length < MIN_RECORD_SIZE {
                return Err(StorageError::corruption_at_offset(
                    offset as u64,
                    format!("Invalid record length: {}", record_length),
                ));
            }
            if remaining.len() < record_length {
                // Torn write at the tail
                break;
            }

            let record = &remaining[..record_length];
            let checksum_offset = record_length - 4;
            let expected = u32::from_le_bytes([
                record[checksum_offset],
                record[checksum_offset + 1],
                record[checksum_offset + 2],
                record[checksum_offset + 3],
            ]);
            if !verify_checksum(&record[..checksum_offset], expected) {
                return Err(StorageError::corruption_at_offset(
                    offset as u64,
                    "Journal record checksum mismatch",
                ));
            }

            let (table, ops) = decode_body(&record[4..checksum_offset]).map_err(|e| {
                StorageError::corruption_at_offset(offset as u64, format!("Malformed record: {}", e))
            })?;
            let entry = image.entry(table.clone()).or_default();
            apply_batch(entry, ops);
            if entry.is_empty() {
                image.remove(&table);
            }

            offset += record_length;
        }

        Ok((image, offset as u64))
    }
}

impl StorageBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, table: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let image = self.image.read().unwrap_or_else(PoisonError::into_inner);
        Ok(image.get(table).and_then(|t| t.get(key).cloned()))
    }

    fn write_batch(&self, table: &str, ops: Vec<BatchOp>) -> StorageResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let record = encode_record(table, &ops);

        let mut journal = self.journal.lock().unwrap_or_else(PoisonError::into_inner);
        journal.file.write_all(&record).map_err(|e| {
            StorageError::write_failed(
                format!("Failed to append journal record at offset {}", journal.offset),
                e,
            )
        })?;
        if self.sync_writes {
            journal.file.sync_data().map_err(|e| {
                StorageError::write_failed("fsync failed after journal append", e)
            })?;
        }
        journal.offset += record.len() as u64;

        // The image is updated while the journal lock is held so journal
        // order and image order agree.
        let mut image = self.image.write().unwrap_or_else(PoisonError::into_inner);
        let entry = image.entry(table.to_string()).or_default();
        apply_batch(entry, ops);
        if entry.is_empty() {
            image.remove(table);
        }
        Ok(())
    }

    fn scan(&self, table: &str, range: &ScanRange) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let image = self.image.read().unwrap_or_else(PoisonError::into_inner);
        Ok(image
            .get(table)
            .map(|t| scan_table(t, range))
            .unwrap_or_default())
    }

    fn tables(&self) -> StorageResult<Vec<String>> {
        let image = self.image.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = image.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn flush(&self) -> StorageResult<()> {
        let journal = self.journal.lock().unwrap_or_else(PoisonError::into_inner);
        journal
            .file
            .sync_all()
            .map_err(|e| StorageError::write_failed("fsync failed on flush", e))
    }

    /// Rewrites the journal so it holds exactly one put per live key.
    ///
    /// Deletes and overwritten values accumulate in the journal; after a
    /// rollback this reclaims the space.
    fn compact(&self) -> StorageResult<u64> {
        let mut journal = self.journal.lock().unwrap_or_else(PoisonError::into_inner);
        let image = self.image.read().unwrap_or_else(PoisonError::into_inner);

        let compact_path = self.data_dir.join(COMPACT_FILE);
        let journal_path = self.data_dir.join(JOURNAL_FILE);

        let mut buffer = Vec::new();
        let mut names: Vec<&String> = image.keys().collect();
        names.sort();
        for name in names {
            let table = &image[name];
            let ops: Vec<BatchOp> = table
                .iter()
                .map(|(k, v)| BatchOp::put(k.clone(), v.clone()))
                .collect();
            buffer.extend_from_slice(&encode_record(name, &ops));
        }

        fs::write(&compact_path, &buffer)
            .map_err(|e| StorageError::write_failed("Failed to write compacted journal", e))?;
        File::open(&compact_path)
            .and_then(|f| f.sync_all())
            .map_err(|e| StorageError::write_failed("fsync failed for compacted journal", e))?;
        fs::rename(&compact_path, &journal_path)
            .map_err(|e| StorageError::write_failed("Failed to replace journal", e))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&journal_path)
            .map_err(|e| StorageError::write_failed("Failed to reopen journal", e))?;
        *journal = Journal {
            file,
            offset: buffer.len() as u64,
        };
        Self::seek_to_end(&mut journal)?;
        Ok(journal.offset)
    }
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn encode_record(table: &str, ops: &[BatchOp]) -> Vec<u8> {
    let mut body = Vec::new();
    write_bytes(&mut body, table.as_bytes());
    body.extend_from_slice(&(ops.len() as u32).to_le_bytes());
    for op in ops {
        match op {
            BatchOp::Put { key, value } => {
                body.push(OP_PUT);
                write_bytes(&mut body, key);
                write_bytes(&mut body, value);
            }
            BatchOp::Delete { key } => {
                body.push(OP_DELETE);
                write_bytes(&mut body, key);
            }
        }
    }

    let record_length = (4 + body.len() + 4) as u32;
    let mut record = Vec::with_capacity(record_length as usize);
    record.extend_from_slice(&record_length.to_le_bytes());
    record.extend_from_slice(&body);
    let checksum = compute_checksum(&record);
    record.extend_from_slice(&checksum.to_le_bytes());
    record
}

fn decode_body(body: &[u8]) -> io::Result<(String, Vec<BatchOp>)> {
    fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_bytes<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
        let len = read_u32(reader)? as usize;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    let mut cursor = io::Cursor::new(body);
    let table = String::from_utf8(read_bytes(&mut cursor)?).map_err(|e| {
        io::Error::new(io::ErrorKind::InvalidData, format!("Invalid UTF-8: {}", e))
    })?;
    let count = read_u32(&mut cursor)? as usize;
    let mut ops = Vec::with_capacity(count);
    for _ in 0..count {
        let mut kind = [0u8; 1];
        cursor.read_exact(&mut kind)?;
        let key = read_bytes(&mut cursor)?;
        match kind[0] {
            OP_PUT => ops.push(BatchOp::put(key, read_bytes(&mut cursor)?)),
            OP_DELETE => ops.push(BatchOp::delete(key)),
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Unknown op kind: {}", other),
                ))
            }
        }
    }
    Ok((table, ops))
}
