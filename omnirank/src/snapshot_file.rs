//! On-disk snapshot format.
//!
//! ```text
//! header (36 bytes, little-endian):
//!   magic "ORSN" | version u16 | reserved u16 | entry_count u32 |
//!   store_fingerprint u32 | as_of i64 | body_len u64 | crc32 u32
//! body:
//!   entries       entry_count x { id i64, visit_count i64, created_at i64,
//!                 last_visited flag u8 [+ i64], url str32, title flag u8 [+ str32] }
//!   postings      u32 count x { trigram str16, u32 n, n x slot u32 }
//!   top slots     u32 n, n x slot u32
//! ```
//!
//! The header alone answers "is this file worth loading" without touching
//! the body. The CRC covers every header field before it plus the whole
//! body, and a full load verifies it before decoding anything.

use crate::indexer::{CacheSnapshot, Slot};
use crate::models::HistoryRecord;
use crc32fast::Hasher as Crc32Hasher;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SNAPSHOT_MAGIC: [u8; 4] = *b"ORSN";
const SNAPSHOT_VERSION: u16 = 2;
pub const HEADER_LEN: usize = 36;

/// Header bytes covered by the checksum (everything but the checksum itself).
const CHECKED_HEADER_LEN: usize = HEADER_LEN - 4;

/// Smallest possible encoded record: three i64 fields, two flag bytes and
/// the url length prefix.
const MIN_RECORD_BYTES: usize = 8 * 3 + 1 + 1 + 4;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a snapshot file (bad magic)")]
    BadMagic,
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u16),
    #[error("snapshot checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("snapshot truncated while reading {0}")]
    Truncated(&'static str),
    #[error("snapshot is inconsistent: {0}")]
    Inconsistent(String),
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Fixed-size prefix of a snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub version: u16,
    pub entry_count: u32,
    /// Fingerprint of the store's most recent rows when the snapshot was built.
    pub store_fingerprint: u32,
    pub as_of: i64,
    pub body_len: u64,
    pub crc32: u32,
}

impl SnapshotHeader {
    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&SNAPSHOT_MAGIC);
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        // 6..8 reserved
        out[8..12].copy_from_slice(&self.entry_count.to_le_bytes());
        out[12..16].copy_from_slice(&self.store_fingerprint.to_le_bytes());
        out[16..24].copy_from_slice(&self.as_of.to_le_bytes());
        out[24..32].copy_from_slice(&self.body_len.to_le_bytes());
        out[32..36].copy_from_slice(&self.crc32.to_le_bytes());
        out
    }

    fn decode(data: &[u8]) -> SnapshotResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(SnapshotError::Truncated("header"));
        }
        if data[..4] != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        Ok(Self {
            version,
            entry_count: u32::from_le_bytes(le4(&data[8..12])),
            store_fingerprint: u32::from_le_bytes(le4(&data[12..16])),
            as_of: i64::from_le_bytes(le8(&data[16..24])),
            body_len: u64::from_le_bytes(le8(&data[24..32])),
            crc32: u32::from_le_bytes(le4(&data[32..36])),
        })
    }
}

fn le4(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[..4]);
    out
}

fn le8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}

fn checksum(header_prefix: &[u8], body: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(header_prefix);
    hasher.update(body);
    hasher.finalize()
}

/// Sibling path used while a save is in progress.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

// ─────────────────────────────────────────────────────────────────────────────
// WRITE
// ─────────────────────────────────────────────────────────────────────────────

fn put_str32(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn put_slots(buf: &mut Vec<u8>, slots: &[Slot]) {
    buf.extend_from_slice(&(slots.len() as u32).to_le_bytes());
    for slot in slots {
        buf.extend_from_slice(&slot.to_le_bytes());
    }
}

fn encode_body(snapshot: &CacheSnapshot) -> Vec<u8> {
    let mut body = Vec::with_capacity(snapshot.len() * 96);

    for record in snapshot.records() {
        body.extend_from_slice(&record.id.to_le_bytes());
        body.extend_from_slice(&record.visit_count.to_le_bytes());
        body.extend_from_slice(&record.created_at.to_le_bytes());
        match record.last_visited {
            Some(ts) => {
                body.push(1);
                body.extend_from_slice(&ts.to_le_bytes());
            }
            None => body.push(0),
        }
        put_str32(&mut body, &record.url);
        match &record.title {
            Some(title) => {
                body.push(1);
                put_str32(&mut body, title);
            }
            None => body.push(0),
        }
    }

    // Sorted so identical snapshots produce identical bytes
    let mut trigrams: Vec<(&String, &Vec<Slot>)> = snapshot.postings().iter().collect();
    trigrams.sort_unstable_by(|a, b| a.0.cmp(b.0));
    body.extend_from_slice(&(trigrams.len() as u32).to_le_bytes());
    for (trigram, slots) in trigrams {
        body.extend_from_slice(&(trigram.len() as u16).to_le_bytes());
        body.extend_from_slice(trigram.as_bytes());
        put_slots(&mut body, slots);
    }

    put_slots(&mut body, snapshot.top_slots());
    body
}

/// Serialize a snapshot into a complete file image.
pub fn encode(snapshot: &CacheSnapshot) -> Vec<u8> {
    let body = encode_body(snapshot);
    let mut header = SnapshotHeader {
        version: SNAPSHOT_VERSION,
        entry_count: snapshot.len() as u32,
        store_fingerprint: snapshot.store_fingerprint(),
        as_of: snapshot.as_of(),
        body_len: body.len() as u64,
        crc32: 0,
    };
    header.crc32 = checksum(&header.encode()[..CHECKED_HEADER_LEN], &body);

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&body);
    out
}

/// Write `snapshot` to `path` via a temp file and rename, so readers never
/// see a half-written file. Returns the number of bytes written.
pub fn save(path: &Path, snapshot: &CacheSnapshot) -> SnapshotResult<u64> {
    let data = encode(snapshot);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_path_for(path);
    std::fs::write(&tmp, &data)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }

    tracing::debug!(
        path = %path.display(),
        entries = snapshot.len(),
        bytes = data.len(),
        "snapshot saved"
    );
    Ok(data.len() as u64)
}

// ─────────────────────────────────────────────────────────────────────────────
// READ
// ─────────────────────────────────────────────────────────────────────────────

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &'static str) -> SnapshotResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(SnapshotError::Truncated(what))?;
        if end > self.data.len() {
            return Err(SnapshotError::Truncated(what));
        }
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self, what: &'static str) -> SnapshotResult<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> SnapshotResult<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &'static str) -> SnapshotResult<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self, what: &'static str) -> SnapshotResult<i64> {
        Ok(i64::from_le_bytes(le8(self.take(8, what)?)))
    }

    fn string(&mut self, len: usize, what: &'static str) -> SnapshotResult<String> {
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SnapshotError::Inconsistent(format!("{} is not valid UTF-8", what)))
    }

    fn str32(&mut self, what: &'static str) -> SnapshotResult<String> {
        let len = self.u32(what)? as usize;
        self.string(len, what)
    }

    fn slots(&mut self, what: &'static str) -> SnapshotResult<Vec<Slot>> {
        let n = self.u32(what)? as usize;
        // Guard the allocation against a corrupt count
        if n.saturating_mul(4) > self.data.len() - self.pos {
            return Err(SnapshotError::Truncated(what));
        }
        (0..n).map(|_| self.u32(what)).collect()
    }

    fn is_done(&self) -> bool {
        self.pos == self.data.len()
    }
}

fn decode_body(header: &SnapshotHeader, body: &[u8]) -> SnapshotResult<CacheSnapshot> {
    let mut r = Reader::new(body);

    let entry_count = header.entry_count as usize;
    if entry_count.saturating_mul(MIN_RECORD_BYTES) > body.len() {
        return Err(SnapshotError::Inconsistent(format!(
            "{} entries cannot fit in a {} byte body",
            entry_count,
            body.len()
        )));
    }
    let mut records = Vec::with_capacity(entry_count);
    for _ in 0..header.entry_count {
        let id = r.i64("record id")?;
        let visit_count = r.i64("visit count")?;
        let created_at = r.i64("created_at")?;
        let last_visited = match r.u8("last_visited flag")? {
            0 => None,
            _ => Some(r.i64("last_visited")?),
        };
        let url = r.str32("url")?;
        let title = match r.u8("title flag")? {
            0 => None,
            _ => Some(r.str32("title")?),
        };
        records.push(HistoryRecord {
            id,
            url,
            title,
            visit_count,
            last_visited,
            created_at,
        });
    }

    let trigram_count = r.u32("trigram count")? as usize;
    let mut postings = HashMap::with_capacity(trigram_count.min(body.len()));
    for _ in 0..trigram_count {
        let len = r.u16("trigram")? as usize;
        let trigram = r.string(len, "trigram")?;
        let slots = r.slots("posting list")?;
        postings.insert(trigram, slots);
    }

    let top_slots = r.slots("top slots")?;
    if !r.is_done() {
        return Err(SnapshotError::Inconsistent("trailing bytes after body".into()));
    }

    CacheSnapshot::from_parts(records, postings, top_slots, header.as_of)
        .map(|snapshot| snapshot.with_store_fingerprint(header.store_fingerprint))
        .ok_or_else(|| SnapshotError::Inconsistent("slot out of range".into()))
}

/// Parse a complete file image, verifying the checksum first.
pub fn decode(data: &[u8]) -> SnapshotResult<CacheSnapshot> {
    let header = SnapshotHeader::decode(data)?;
    let body = &data[HEADER_LEN..];
    if body.len() as u64 != header.body_len {
        return Err(SnapshotError::Truncated("body"));
    }
    let computed = checksum(&data[..CHECKED_HEADER_LEN], body);
    if computed != header.crc32 {
        return Err(SnapshotError::ChecksumMismatch {
            stored: header.crc32,
            computed,
        });
    }
    decode_body(&header, body)
}

/// Read and validate only the fixed header. Also checks that the file is
/// long enough to hold the body the header promises.
pub fn read_header(path: &Path) -> SnapshotResult<SnapshotHeader> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = [0u8; HEADER_LEN];
    file.read_exact(&mut buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => SnapshotError::Truncated("header"),
        _ => SnapshotError::Io(e),
    })?;
    let header = SnapshotHeader::decode(&buf)?;

    let file_len = file.metadata()?.len();
    if file_len != HEADER_LEN as u64 + header.body_len {
        return Err(SnapshotError::Truncated("body"));
    }
    Ok(header)
}

pub fn load(path: &Path) -> SnapshotResult<CacheSnapshot> {
    let data = std::fs::read(path)?;
    let snapshot = decode(&data)?;
    tracing::debug!(
        path = %path.display(),
        entries = snapshot.len(),
        trigrams = snapshot.trigram_count(),
        "snapshot loaded"
    );
    Ok(snapshot)
}
