//! Duplicate message detection across runs.
//!
//! Every accepted post leaves an 8-byte record in `ftn_dupes.dat`: a CRC-32 over the
//! message header fields and a CRC-32 over its MSGID kludge. The whole file is loaded into
//! two hash sets on open, and the sets are kept in step with the file for the life of the
//! store. A zero hash never matches, which makes a missing MSGID harmless.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc::{Crc, CRC_32_ISO_HDLC};
use log::{debug, warn};

use crate::ftn::codec::{latin1_encode, PackedMessage};
use crate::ftn::FidoAddress;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub const DUPES_FILE: &str = "ftn_dupes.dat";
pub const MSGID_FILE: &str = "ftn_msgid.dat";
const RECORD_SIZE: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum DupeError {
    #[error("duplicate store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> DupeError + '_ {
    move |source| DupeError::Io { path: path.to_path_buf(), source }
}

/// The two hashes identifying a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DupeKeys {
    pub header_hash: u32,
    pub msgid_hash: u32,
}

impl DupeKeys {
    fn to_bytes(self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[..4].copy_from_slice(&self.header_hash.to_le_bytes());
        out[4..].copy_from_slice(&self.msgid_hash.to_le_bytes());
        out
    }

    fn from_bytes(raw: &[u8]) -> Self {
        Self {
            header_hash: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            msgid_hash: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        }
    }
}

fn crc_of(text: &str) -> u32 {
    CRC32.checksum(&latin1_encode(text))
}

/// The value of the `^AMSGID:` kludge in `text`, or `""` when there is none.
pub fn msgid_of(text: &str) -> &str {
    text.split(['\r', '\n'])
        .find_map(|line| line.strip_prefix("\u{1}MSGID:"))
        .map(str::trim)
        .unwrap_or("")
}

pub fn compute_keys(msg: &PackedMessage) -> DupeKeys {
    let h = &msg.header;
    let header_text = format!(
        "{}/{}\n{}/{}\n{}\n{}\n{}\n{}",
        h.orig_net,
        h.orig_node,
        h.dest_net,
        h.dest_node,
        msg.date_time,
        msg.from_user_name,
        msg.subject,
        msg.to_user_name
    );
    DupeKeys {
        header_hash: crc_of(&header_text),
        msgid_hash: crc_of(msgid_of(&msg.text)),
    }
}

/// Persistent duplicate store, owned by one pipeline run.
pub struct DupeStore {
    path: PathBuf,
    file: File,
    records: Vec<DupeKeys>,
    header_hashes: HashSet<u32>,
    msgid_hashes: HashSet<u32>,
}

impl DupeStore {
    /// Open (creating if missing) the store in `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, DupeError> {
        fs::create_dir_all(data_dir).map_err(io_err(data_dir))?;
        let path = data_dir.join(DUPES_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(io_err(&path))?;
        let mut raw = Vec::new();
        file.read_to_end(&mut raw).map_err(io_err(&path))?;
        let whole = raw.len() - raw.len() % RECORD_SIZE;
        if whole != raw.len() {
            warn!(
                "Ignoring {} trailing bytes in {}",
                raw.len() - whole,
                path.display()
            );
        }
        let records: Vec<DupeKeys> = raw[..whole]
            .chunks_exact(RECORD_SIZE)
            .map(DupeKeys::from_bytes)
            .collect();
        debug!("Loaded {} duplicate records from {}", records.len(), path.display());
        let mut store = Self {
            path,
            file,
            records,
            header_hashes: HashSet::new(),
            msgid_hashes: HashSet::new(),
        };
        store.rebuild_sets();
        Ok(store)
    }

    fn rebuild_sets(&mut self) {
        self.header_hashes = self.records.iter().map(|k| k.header_hash).collect();
        self.msgid_hashes = self.records.iter().map(|k| k.msgid_hash).collect();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of persisted records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_duplicate(&self, keys: &DupeKeys) -> bool {
        (keys.header_hash != 0 && self.header_hashes.contains(&keys.header_hash))
            || (keys.msgid_hash != 0 && self.msgid_hashes.contains(&keys.msgid_hash))
    }

    /// Append `keys` and sync the file before returning.
    pub fn record(&mut self, keys: DupeKeys) -> Result<(), DupeError> {
        self.file
            .write_all(&keys.to_bytes())
            .and_then(|_| self.file.flush())
            .and_then(|_| self.file.sync_data())
            .map_err(io_err(&self.path))?;
        self.records.push(keys);
        self.header_hashes.insert(keys.header_hash);
        self.msgid_hashes.insert(keys.msgid_hash);
        Ok(())
    }

    /// Drop every record equal to `keys`; returns how many were removed.
    pub fn remove(&mut self, keys: &DupeKeys) -> Result<usize, DupeError> {
        let before = self.records.len();
        self.records.retain(|k| k != keys);
        let removed = before - self.records.len();
        if removed == 0 {
            return Ok(0);
        }

        let tmp_path = self.path.with_extension(format!("tmp-{}", std::process::id()));
        {
            let mut tmp = File::create(&tmp_path).map_err(io_err(&tmp_path))?;
            let mut raw = Vec::with_capacity(self.records.len() * RECORD_SIZE);
            for k in &self.records {
                raw.extend_from_slice(&k.to_bytes());
            }
            tmp.write_all(&raw)
                .and_then(|_| tmp.sync_all())
                .map_err(io_err(&tmp_path))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(io_err(&self.path))?;
        self.file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err(&self.path))?;
        self.rebuild_sets();
        Ok(removed)
    }
}

/// Allocates MSGID serial numbers from a persisted counter.
pub struct MessageIdAllocator {
    path: PathBuf,
    file: File,
    last: u32,
}

impl MessageIdAllocator {
    pub fn open(data_dir: &Path) -> Result<Self, DupeError> {
        fs::create_dir_all(data_dir).map_err(io_err(data_dir))?;
        let path = data_dir.join(MSGID_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(io_err(&path))?;
        let mut raw = [0u8; 4];
        let last = match file.read_exact(&mut raw) {
            Ok(()) => u32::from_le_bytes(raw),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                let seed = chrono::Utc::now().timestamp() as u32;
                debug!("Seeding message id counter at {:08x}", seed);
                seed
            }
            Err(e) => return Err(io_err(&path)(e)),
        };
        Ok(Self { path, file, last })
    }

    /// Next MSGID for a message originating at `from`, e.g. `1:218/700 5a8f03c1`.
    pub fn next_id(&mut self, from: &FidoAddress) -> Result<String, DupeError> {
        let id = self.last.wrapping_add(1);
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&id.to_le_bytes()))
            .and_then(|_| self.file.sync_data())
            .map_err(io_err(&self.path))?;
        self.last = id;
        Ok(format!("{} {:08x}", from.as_4d_string(), id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftn::codec::PackedHeader;

    fn message(subject: &str, msgid: &str) -> PackedMessage {
        PackedMessage {
            header: PackedHeader {
                orig_net: 218,
                orig_node: 700,
                dest_net: 100,
                dest_node: 1,
                ..Default::default()
            },
            date_time: "04 Jan 16  07:02:09".into(),
            to_user_name: "All".into(),
            from_user_name: "Rushfan".into(),
            subject: subject.into(),
            text: format!("AREA:GENERAL\r\u{1}MSGID: {}\rHello\r", msgid),
        }
    }

    #[test]
    fn keys_depend_on_header_and_msgid() {
        let a = compute_keys(&message("Hi", "1:218/700 00000001"));
        let b = compute_keys(&message("Hi", "1:218/700 00000002"));
        let c = compute_keys(&message("Other", "1:218/700 00000001"));
        assert_eq!(a.header_hash, b.header_hash);
        assert_ne!(a.msgid_hash, b.msgid_hash);
        assert_ne!(a.header_hash, c.header_hash);
        assert_eq!(a.msgid_hash, c.msgid_hash);
    }

    #[test]
    fn missing_msgid_hashes_to_zero() {
        let mut m = message("Hi", "x");
        m.text = "no kludges\r".into();
        assert_eq!(compute_keys(&m).msgid_hash, 0);
        assert_eq!(msgid_of("\u{1}MSGID: 1:2/3 abcd\r"), "1:2/3 abcd");
    }

    #[test]
    fn record_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let keys = compute_keys(&message("Hi", "1:218/700 00000001"));
        {
            let mut store = DupeStore::open(dir.path()).unwrap();
            assert!(!store.is_duplicate(&keys));
            store.record(keys).unwrap();
            assert!(store.is_duplicate(&keys));
        }
        let store = DupeStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.is_duplicate(&keys));
        assert_eq!(fs::metadata(store.path()).unwrap().len(), 8);
    }

    #[test]
    fn either_hash_marks_a_duplicate_but_zero_never_does() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DupeStore::open(dir.path()).unwrap();
        store.record(DupeKeys { header_hash: 11, msgid_hash: 0 }).unwrap();
        assert!(store.is_duplicate(&DupeKeys { header_hash: 11, msgid_hash: 99 }));
        assert!(!store.is_duplicate(&DupeKeys { header_hash: 12, msgid_hash: 0 }));
        store.record(DupeKeys { header_hash: 0, msgid_hash: 42 }).unwrap();
        assert!(store.is_duplicate(&DupeKeys { header_hash: 13, msgid_hash: 42 }));
        assert!(!store.is_duplicate(&DupeKeys { header_hash: 0, msgid_hash: 0 }));
    }

    #[test]
    fn recording_twice_keeps_membership_and_counts_both() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DupeStore::open(dir.path()).unwrap();
        let keys = DupeKeys { header_hash: 1, msgid_hash: 2 };
        store.record(keys).unwrap();
        store.record(keys).unwrap();
        assert!(store.is_duplicate(&keys));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn remove_rewrites_file_and_sets() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DupeStore::open(dir.path()).unwrap();
        let a = DupeKeys { header_hash: 1, msgid_hash: 2 };
        let b = DupeKeys { header_hash: 3, msgid_hash: 4 };
        store.record(a).unwrap();
        store.record(b).unwrap();
        store.record(a).unwrap();
        assert_eq!(store.remove(&a).unwrap(), 2);
        assert!(!store.is_duplicate(&a));
        assert!(store.is_duplicate(&b));
        store.record(DupeKeys { header_hash: 5, msgid_hash: 6 }).unwrap();
        drop(store);
        let reopened = DupeStore::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(!reopened.is_duplicate(&a));
    }

    #[test]
    fn message_ids_increase_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let from = FidoAddress::new(1, 218, 700, 0);
        let first = MessageIdAllocator::open(dir.path()).unwrap().next_id(&from).unwrap();
        let mut alloc = MessageIdAllocator::open(dir.path()).unwrap();
        let second = alloc.next_id(&from).unwrap();
        assert!(first.starts_with("1:218/700 "));
        let serial = |s: &str| u32::from_str_radix(&s[10..], 16).unwrap();
        assert_eq!(serial(&second), serial(&first).wrapping_add(1));
    }
}
