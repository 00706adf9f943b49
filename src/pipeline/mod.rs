//! # Import/export pipeline
//!
//! One [`Pipeline`] serves one run against one network:
//!
//! - **import**: inbound bundles and loose packets are unpacked, checked against the
//!   sender's packet password, deduplicated, age filtered, translated and appended to
//!   `LOCAL.NET`. Packets with a bad password are moved to the bad packets directory.
//! - **export**: every message in `s32765.net` is fanned out (posts to each subscriber of
//!   the echo, email to the address in its "to" field), written to a packet, bundled per
//!   neighbour, and announced through a flow file or a file-attach netmail. Messages that
//!   cannot be routed or bundled are appended to `DEAD.NET`.
//!
//! A failure inside one packet or one message is logged and counted, then the run moves
//! on. Only faults that make the whole run meaningless (unreadable outbound queue, broken
//! duplicate store) are returned as errors.

mod bundle;
mod dispatch;
mod export;
mod import;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::{error, info};
use serde::Serialize;

use crate::archiver::Archiver;
use crate::config::{Config, NetworkConfig};
use crate::dupe::{DupeStore, MessageIdAllocator};
use crate::ftn::naming::BundleStatus;
use crate::ftn::{FidoAddress, RouteEntry};

pub use dispatch::{write_attach_netmail, write_flo_entry};

/// Counters for one import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub bundles: u32,
    pub packets: u32,
    pub imported: u32,
    pub duplicates: u32,
    pub too_old: u32,
    pub deleted: u32,
    pub quarantined: u32,
    pub failed: u32,
}

impl ImportStats {
    fn merge(&mut self, other: &ImportStats) {
        self.bundles += other.bundles;
        self.packets += other.packets;
        self.imported += other.imported;
        self.duplicates += other.duplicates;
        self.too_old += other.too_old;
        self.deleted += other.deleted;
        self.quarantined += other.quarantined;
        self.failed += other.failed;
    }
}

/// Counters for one export run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportStats {
    pub messages: u32,
    pub packets: u32,
    pub bundles: u32,
    pub dispatched: u32,
    pub dead_lettered: u32,
}

impl ExportStats {
    fn merge(&mut self, other: &ExportStats) {
        self.messages += other.messages;
        self.packets += other.packets;
        self.bundles += other.bundles;
        self.dispatched += other.dispatched;
        self.dead_lettered += other.dead_lettered;
    }
}

pub struct Pipeline {
    net: NetworkConfig,
    system_name: String,
    address: FidoAddress,
    routes: Vec<RouteEntry>,
    archiver: Box<dyn Archiver>,
    dupes: DupeStore,
    msgids: MessageIdAllocator,
    fixed_now: Option<DateTime<Local>>,
    /// Compressed bundles opened this run, by neighbour and status.
    open_bundles: HashMap<(FidoAddress, BundleStatus), PathBuf>,
    /// Bundles already announced to the mailer this run.
    dispatched: HashSet<PathBuf>,
    /// Packet names handed out this run, so bundle members never collide.
    packet_names: HashSet<String>,
}

impl Pipeline {
    pub fn new(config: &Config, network: Option<&str>, archiver: Box<dyn Archiver>) -> Result<Self> {
        let net = config.network(network)?.clone();
        let data_dir = config.data_dir();
        let dupes = DupeStore::open(&data_dir)
            .with_context(|| format!("opening duplicate store in {}", data_dir.display()))?;
        let msgids = MessageIdAllocator::open(&data_dir)
            .with_context(|| format!("opening message id counter in {}", data_dir.display()))?;
        Ok(Self {
            address: net.address()?,
            routes: net.route_table()?,
            system_name: config.system.name.clone(),
            net,
            archiver,
            dupes,
            msgids,
            fixed_now: None,
            open_bundles: HashMap::new(),
            dispatched: HashSet::new(),
            packet_names: HashSet::new(),
        })
    }

    /// Pin the clock, for reproducible file names and age checks.
    pub fn with_fixed_time(mut self, now: DateTime<Local>) -> Self {
        self.fixed_now = Some(now);
        self
    }

    fn now(&self) -> DateTime<Local> {
        self.fixed_now.unwrap_or_else(Local::now)
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.net
    }

    pub fn dupes(&self) -> &DupeStore {
        &self.dupes
    }

    /// Import repeatedly while inbound work keeps appearing, up to `max_passes`.
    pub fn run_import(&mut self) -> Result<ImportStats> {
        let mut total = ImportStats::default();
        for pass in 1..=self.net.max_passes.max(1) {
            if pass > 1 && !self.has_pending_import()? {
                break;
            }
            let stats = self.import_pass()?;
            info!("Import pass {} for {}: {} messages imported", pass, self.net.name, stats.imported);
            total.merge(&stats);
        }
        info!("Import summary: {}", serde_json::to_string(&total)?);
        Ok(total)
    }

    /// Export repeatedly while a fresh outbound queue keeps appearing, up to `max_passes`.
    pub fn run_export(&mut self) -> Result<ExportStats> {
        let mut total = ExportStats::default();
        for pass in 1..=self.net.max_passes.max(1) {
            if pass > 1 && !self.has_pending_export() {
                break;
            }
            let stats = self.export_pass()?;
            info!("Export pass {} for {}: {} messages", pass, self.net.name, stats.messages);
            total.merge(&stats);
        }
        info!("Export summary: {}", serde_json::to_string(&total)?);
        Ok(total)
    }

    /// Remove a processed source file, or move it to the archive directory when one is set.
    fn retire_source(&self, path: &Path) {
        match self.net.archive_path() {
            Some(dir) => {
                if let Err(e) = move_into(path, &dir) {
                    error!("Unable to archive {} into {}: {}", path.display(), dir.display(), e);
                }
            }
            None => {
                if let Err(e) = fs::remove_file(path) {
                    error!("Unable to remove {}: {}", path.display(), e);
                }
            }
        }
    }
}

/// Rename, falling back to copy + remove across file systems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Move `path` into `dir` under its own file name, creating `dir` if needed. An existing
/// file of that name is kept; the newcomer gets a `.1`, `.2`, ... suffix instead.
fn move_into(path: &Path, dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
        .to_string_lossy()
        .into_owned();
    let mut dest = dir.join(&name);
    let mut n = 0u32;
    while dest.exists() {
        n += 1;
        dest = dir.join(format!("{}.{}", name, n));
    }
    move_file(path, &dest)?;
    Ok(dest)
}

/// Regular files in `dir` sorted by name; a missing directory is empty.
fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_into_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.pkt");
        fs::write(&src, b"x").unwrap();
        let dest = move_into(&src, &dir.path().join("archive")).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(dest).unwrap(), b"x");
    }

    #[test]
    fn move_into_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive");
        for body in [b"one", b"two"] {
            let src = dir.path().join("s32765.net");
            fs::write(&src, body).unwrap();
            move_into(&src, &archive).unwrap();
        }
        assert_eq!(fs::read(archive.join("s32765.net")).unwrap(), b"one");
        assert_eq!(fs::read(archive.join("s32765.net.1")).unwrap(), b"two");
    }

    #[test]
    fn list_files_is_sorted_and_tolerates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b"), b"").unwrap();
        fs::write(dir.path().join("a"), b"").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let names: Vec<String> = list_files(dir.path()).unwrap().iter().map(|p| file_name_of(p)).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(list_files(&dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn stats_merge_adds_counters() {
        let mut a = ExportStats { messages: 1, dead_lettered: 1, ..Default::default() };
        a.merge(&ExportStats { messages: 2, bundles: 1, ..Default::default() });
        assert_eq!(a, ExportStats { messages: 3, bundles: 1, dead_lettered: 1, ..Default::default() });
        let json = serde_json::to_string(&ImportStats::default()).unwrap();
        assert!(json.contains("\"quarantined\":0"));
    }
}
