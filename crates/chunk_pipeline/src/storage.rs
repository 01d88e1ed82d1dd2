//! Chunk persistence: the storage seam, the on-disk encoding, and an
//! in-memory store.
//!
//! # Record Layout
//!
//! ```text
//!   ┌────────┬─────────┬────────┬───────┬───────┬─────────────┬─────────┐
//!   │ "CHNK" │ version │ status │ x i32 │ z i32 │ payload u32 │ payload │
//!   └────────┴─────────┴────────┴───────┴───────┴─────────────┴─────────┘
//!     4 B      1 B       1 B      4 B     4 B     4 B (len)      len B
//! ```
//!
//! All integers are little-endian.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::StorageError;
use crate::types::{ChunkData, ChunkPos, ChunkStatus};

/// Byte store keyed by chunk position.
pub trait ChunkStorage: Send + Sync + 'static {
  /// Stored bytes for `pos`, `None` if nothing was ever saved there.
  fn read(&self, pos: ChunkPos) -> Result<Option<Vec<u8>>, StorageError>;

  fn write(&self, pos: ChunkPos, bytes: Vec<u8>) -> Result<(), StorageError>;
}

// =============================================================================
// ChunkCodec
// =============================================================================

/// Encoding of [`ChunkData`] records.
pub struct ChunkCodec;

impl ChunkCodec {
  const MAGIC: &'static [u8; 4] = b"CHNK";
  const VERSION: u8 = 1;

  pub fn encode(chunk: &ChunkData) -> Vec<u8> {
    let mut out = Vec::with_capacity(18 + chunk.payload.len());
    // Writing into a Vec cannot fail.
    let _ = Self::write_record(chunk, &mut out);
    out
  }

  fn write_record<W: Write>(chunk: &ChunkData, writer: &mut W) -> io::Result<()> {
    writer.write_all(Self::MAGIC)?;
    writer.write_all(&[Self::VERSION, chunk.status as u8])?;
    writer.write_all(&chunk.pos.x.to_le_bytes())?;
    writer.write_all(&chunk.pos.z.to_le_bytes())?;
    writer.write_all(&(chunk.payload.len() as u32).to_le_bytes())?;
    writer.write_all(&chunk.payload)
  }

  /// Decode a record stored under `pos`. The stored position must match.
  pub fn decode(pos: ChunkPos, mut bytes: &[u8]) -> Result<ChunkData, StorageError> {
    let corrupt = |reason: String| StorageError::Corrupt { pos, reason };
    let truncated = |_: io::Error| StorageError::Corrupt {
      pos,
      reason: "truncated record".into(),
    };

    let mut magic = [0u8; 4];
    bytes.read_exact(&mut magic).map_err(truncated)?;
    if &magic != Self::MAGIC {
      return Err(corrupt("invalid magic".into()));
    }

    let mut header = [0u8; 2];
    bytes.read_exact(&mut header).map_err(truncated)?;
    if header[0] != Self::VERSION {
      return Err(corrupt(format!("unsupported version {}", header[0])));
    }
    let status = ChunkStatus::from_index(header[1] as usize)
      .ok_or_else(|| corrupt(format!("unknown status {}", header[1])))?;

    let mut buf4 = [0u8; 4];
    bytes.read_exact(&mut buf4).map_err(truncated)?;
    let x = i32::from_le_bytes(buf4);
    bytes.read_exact(&mut buf4).map_err(truncated)?;
    let z = i32::from_le_bytes(buf4);
    if ChunkPos::new(x, z) != pos {
      return Err(corrupt(format!("record belongs to [{x}, {z}]")));
    }

    bytes.read_exact(&mut buf4).map_err(truncated)?;
    let len = u32::from_le_bytes(buf4) as usize;
    if bytes.len() != len {
      return Err(corrupt(format!("payload is {} bytes, header says {len}", bytes.len())));
    }

    Ok(ChunkData {
      pos,
      status,
      payload: bytes.to_vec(),
    })
  }
}

// =============================================================================
// MemoryStorage
// =============================================================================

/// Thread-safe in-memory store with switchable failures.
#[derive(Default)]
pub struct MemoryStorage {
  records: Mutex<FxHashMap<ChunkPos, Vec<u8>>>,
  fail_reads: AtomicBool,
  fail_writes: AtomicBool,
  reads: AtomicUsize,
  writes: AtomicUsize,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Store an encoded chunk directly, bypassing the write counter.
  pub fn insert_chunk(&self, chunk: &ChunkData) {
    self.records.lock().insert(chunk.pos, ChunkCodec::encode(chunk));
  }

  /// Store raw bytes, e.g. a corrupt record.
  pub fn insert_raw(&self, pos: ChunkPos, bytes: Vec<u8>) {
    self.records.lock().insert(pos, bytes);
  }

  /// Decoded record, if one is stored and valid.
  pub fn chunk(&self, pos: ChunkPos) -> Option<ChunkData> {
    let bytes = self.records.lock().get(&pos).cloned()?;
    ChunkCodec::decode(pos, &bytes).ok()
  }

  pub fn contains(&self, pos: ChunkPos) -> bool {
    self.records.lock().contains_key(&pos)
  }

  pub fn len(&self) -> usize {
    self.records.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.lock().is_empty()
  }

  pub fn set_fail_reads(&self, fail: bool) {
    self.fail_reads.store(fail, Ordering::Release);
  }

  pub fn set_fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::Release);
  }

  pub fn read_count(&self) -> usize {
    self.reads.load(Ordering::Acquire)
  }

  pub fn write_count(&self) -> usize {
    self.writes.load(Ordering::Acquire)
  }

  fn injected(pos: ChunkPos, what: &str) -> StorageError {
    StorageError::Io {
      pos,
      source: io::Error::other(format!("injected {what} failure")),
    }
  }
}

impl ChunkStorage for MemoryStorage {
  fn read(&self, pos: ChunkPos) -> Result<Option<Vec<u8>>, StorageError> {
    self.reads.fetch_add(1, Ordering::AcqRel);
    if self.fail_reads.load(Ordering::Acquire) {
      return Err(Self::injected(pos, "read"));
    }
    Ok(self.records.lock().get(&pos).cloned())
  }

  fn write(&self, pos: ChunkPos, bytes: Vec<u8>) -> Result<(), StorageError> {
    if self.fail_writes.load(Ordering::Acquire) {
      return Err(Self::injected(pos, "write"));
    }
    self.writes.fetch_add(1, Ordering::AcqRel);
    self.records.lock().insert(pos, bytes);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> ChunkData {
    ChunkData {
      pos: ChunkPos::new(-3, 9),
      status: ChunkStatus::Carvers,
      payload: vec![1, 2, 3, 4, 5, 6],
    }
  }

  #[test]
  fn test_decode_encoded_record() {
    let chunk = sample();
    let bytes = ChunkCodec::encode(&chunk);
    assert_eq!(&bytes[..4], b"CHNK");
    assert_eq!(ChunkCodec::decode(chunk.pos, &bytes).unwrap(), chunk);
  }

  #[test]
  fn test_decode_rejects_damage() {
    let chunk = sample();
    let bytes = ChunkCodec::encode(&chunk);

    let truncated = ChunkCodec::decode(chunk.pos, &bytes[..bytes.len() - 1]);
    assert!(matches!(truncated, Err(StorageError::Corrupt { .. })));

    let wrong_pos = ChunkCodec::decode(ChunkPos::ZERO, &bytes);
    assert!(matches!(wrong_pos, Err(StorageError::Corrupt { .. })));

    let mut bad_status = bytes.clone();
    bad_status[5] = 200;
    assert!(ChunkCodec::decode(chunk.pos, &bad_status).is_err());

    assert!(ChunkCodec::decode(chunk.pos, b"nope").is_err());
  }

  #[test]
  fn test_memory_storage_fault_injection() {
    let storage = MemoryStorage::new();
    let chunk = sample();

    storage.set_fail_writes(true);
    assert!(storage.write(chunk.pos, ChunkCodec::encode(&chunk)).is_err());
    assert!(storage.is_empty());

    storage.set_fail_writes(false);
    storage.write(chunk.pos, ChunkCodec::encode(&chunk)).unwrap();
    assert_eq!(storage.write_count(), 1);
    assert_eq!(storage.chunk(chunk.pos), Some(chunk.clone()));

    storage.set_fail_reads(true);
    assert!(matches!(storage.read(chunk.pos), Err(StorageError::Io { .. })));
    storage.set_fail_reads(false);
    assert!(storage.read(ChunkPos::ZERO).unwrap().is_none());
    assert_eq!(storage.read_count(), 2);
  }
}
