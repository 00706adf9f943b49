//! Bundle compression and extraction.
//!
//! The pipeline only sees the [`Archiver`] trait. [`ArchiverTable`] handles `TGZ` bundles
//! in-process with `tar` + `flate2` and hands every other type to the external command
//! configured for it in `[[archivers]]`.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Command;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info, warn};
use tar::{Archive, Builder, Header};

use crate::config::ArchiverConfig;

/// Compression type that means "send the bare packet".
pub const NO_COMPRESSION: &str = "PKT";
/// Compression type handled without an external tool.
pub const BUILTIN_TGZ: &str = "TGZ";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no archiver configured for type '{0}'")]
    NoArchiver(String),

    #[error("archiver command for type '{0}' is empty")]
    EmptyCommand(String),

    #[error("unable to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("'{command}' exited with {status}")]
    CommandFailed { command: String, status: String },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io { path: path.to_path_buf(), source }
}

/// Compress/extract collaborator used by the pipeline.
pub trait Archiver {
    /// Add `packet` to `bundle`, creating the bundle when it does not exist yet.
    fn compress(&self, kind: &str, bundle: &Path, packet: &Path) -> Result<(), ArchiveError>;

    /// Extract every member of `bundle` into `dest_dir`.
    fn extract(&self, kind: &str, bundle: &Path, dest_dir: &Path) -> Result<(), ArchiveError>;
}

/// Guess a bundle's compression type from its first bytes.
pub fn detect_archive_type(path: &Path) -> io::Result<Option<&'static str>> {
    let mut head = [0u8; 10];
    let mut file = File::open(path)?;
    let mut got = 0;
    while got < head.len() {
        match file.read(&mut head[got..])? {
            0 => break,
            n => got += n,
        }
    }
    Ok(detect_from_magic(&head[..got]))
}

fn detect_from_magic(head: &[u8]) -> Option<&'static str> {
    match head {
        [0x60, 0xea, ..] => Some("ARJ"),
        [0x1f, 0x8b, ..] => Some(BUILTIN_TGZ),
        [b'P', b'K', ..] => Some("ZIP"),
        [b'R', b'a', ..] => Some("RAR"),
        [b'Z', b'O', b'O', ..] => Some("ZOO"),
        [0x1a, ..] => Some("ARC"),
        _ if head.windows(3).any(|w| w == b"-lh") => Some("LHA"),
        _ => None,
    }
}

/// Expand `%1`, `%2` and `%%` in one command template, split into arguments.
fn expand_template(template: &str, bundle: &Path, packet: Option<&Path>) -> Vec<String> {
    let bundle = bundle.display().to_string();
    let packet = packet.map(|p| p.display().to_string()).unwrap_or_default();
    template
        .split_whitespace()
        .map(|token| {
            let mut arg = String::with_capacity(token.len());
            let mut chars = token.chars().peekable();
            while let Some(c) = chars.next() {
                if c != '%' {
                    arg.push(c);
                    continue;
                }
                match chars.peek() {
                    Some('1') => arg.push_str(&bundle),
                    Some('2') => arg.push_str(&packet),
                    Some('%') => arg.push('%'),
                    _ => {
                        arg.push('%');
                        continue;
                    }
                }
                chars.next();
            }
            arg
        })
        .filter(|arg| !arg.is_empty())
        .collect()
}

/// Configured archivers plus the built-in TGZ handler.
#[derive(Debug, Clone, Default)]
pub struct ArchiverTable {
    commands: Vec<ArchiverConfig>,
}

impl ArchiverTable {
    pub fn new(commands: Vec<ArchiverConfig>) -> Self {
        Self { commands }
    }

    /// Case-insensitive lookup, falling back to the first configured archiver.
    fn find(&self, kind: &str) -> Result<&ArchiverConfig, ArchiveError> {
        self.commands
            .iter()
            .find(|a| a.extension.eq_ignore_ascii_case(kind))
            .or_else(|| {
                let first = self.commands.first();
                if let Some(a) = first {
                    warn!("No archiver for type '{}'; using '{}'", kind, a.extension);
                }
                first
            })
            .ok_or_else(|| ArchiveError::NoArchiver(kind.to_string()))
    }

    fn run(&self, kind: &str, args: Vec<String>, cwd: &Path) -> Result<(), ArchiveError> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| ArchiveError::EmptyCommand(kind.to_string()))?;
        let command = args.join(" ");
        info!("Command: {}", command);
        let status = Command::new(program)
            .args(rest)
            .current_dir(cwd)
            .status()
            .map_err(|source| ArchiveError::Spawn { command: command.clone(), source })?;
        if !status.success() {
            return Err(ArchiveError::CommandFailed { command, status: status.to_string() });
        }
        Ok(())
    }
}

fn parent_or_dot(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Write `bundle` as a gzipped tar holding its previous members plus `packet`.
fn tgz_compress(bundle: &Path, packet: &Path) -> Result<(), ArchiveError> {
    let mut members: Vec<(Header, Vec<u8>)> = Vec::new();
    if bundle.exists() {
        let file = File::open(bundle).map_err(io_err(bundle))?;
        let mut archive = Archive::new(GzDecoder::new(file));
        for entry in archive.entries().map_err(io_err(bundle))? {
            let mut entry = entry.map_err(io_err(bundle))?;
            let header = entry.header().clone();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).map_err(io_err(bundle))?;
            members.push((header, data));
        }
    }

    let name = packet
        .file_name()
        .ok_or_else(|| ArchiveError::Io {
            path: packet.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "packet path has no file name"),
        })?
        .to_os_string();
    let tmp = bundle.with_extension("tgz-tmp");
    {
        let out = File::create(&tmp).map_err(io_err(&tmp))?;
        let mut tar = Builder::new(GzEncoder::new(out, Compression::default()));
        for (header, data) in members {
            tar.append(&header, data.as_slice()).map_err(io_err(&tmp))?;
        }
        let mut packet_file = File::open(packet).map_err(io_err(packet))?;
        tar.append_file(&name, &mut packet_file).map_err(io_err(packet))?;
        let enc = tar.into_inner().map_err(io_err(&tmp))?;
        enc.finish().map_err(io_err(&tmp))?;
    }
    fs::rename(&tmp, bundle).map_err(io_err(bundle))?;
    Ok(())
}

fn tgz_extract(bundle: &Path, dest_dir: &Path) -> Result<(), ArchiveError> {
    let file = File::open(bundle).map_err(io_err(bundle))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.unpack(dest_dir).map_err(io_err(bundle))?;
    Ok(())
}

impl Archiver for ArchiverTable {
    fn compress(&self, kind: &str, bundle: &Path, packet: &Path) -> Result<(), ArchiveError> {
        if kind.eq_ignore_ascii_case(BUILTIN_TGZ) {
            debug!("Adding {} to {}", packet.display(), bundle.display());
            return tgz_compress(bundle, packet);
        }
        let arc = self.find(kind)?;
        let args = expand_template(&arc.compress, bundle, Some(packet));
        self.run(kind, args, parent_or_dot(bundle))
    }

    fn extract(&self, kind: &str, bundle: &Path, dest_dir: &Path) -> Result<(), ArchiveError> {
        if kind.eq_ignore_ascii_case(BUILTIN_TGZ) {
            debug!("Extracting {} into {}", bundle.display(), dest_dir.display());
            return tgz_extract(bundle, dest_dir);
        }
        let arc = self.find(kind)?;
        let args = expand_template(&arc.extract, bundle, None);
        self.run(kind, args, dest_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zip_config() -> ArchiverConfig {
        ArchiverConfig {
            extension: "ZIP".into(),
            compress: "zip -j -q %1 %2".into(),
            extract: "unzip -o -j -q %1".into(),
        }
    }

    #[test]
    fn detects_magic_bytes() {
        assert_eq!(detect_from_magic(b"PK\x03\x04"), Some("ZIP"));
        assert_eq!(detect_from_magic(&[0x60, 0xea, 0, 0]), Some("ARJ"));
        assert_eq!(detect_from_magic(&[0x1a, 0x08]), Some("ARC"));
        assert_eq!(detect_from_magic(b"Rar!"), Some("RAR"));
        assert_eq!(detect_from_magic(b"ZOO 2.10"), Some("ZOO"));
        assert_eq!(detect_from_magic(b"\x20\x00-lh5-"), Some("LHA"));
        assert_eq!(detect_from_magic(&[0x1f, 0x8b, 8]), Some("TGZ"));
        assert_eq!(detect_from_magic(b"hello"), None);
        assert_eq!(detect_from_magic(b""), None);
    }

    #[test]
    fn expands_command_templates() {
        let args = expand_template(
            "zip -j %1 %2 100%%",
            Path::new("/out/b.mo0"),
            Some(Path::new("/tmp/p.pkt")),
        );
        assert_eq!(args, vec!["zip", "-j", "/out/b.mo0", "/tmp/p.pkt", "100%"]);
        let args = expand_template("unzip %1 %2", Path::new("b.mo0"), None);
        assert_eq!(args, vec!["unzip", "b.mo0"]);
    }

    #[test]
    fn lookup_is_case_insensitive_with_fallback() {
        let table = ArchiverTable::new(vec![zip_config()]);
        assert_eq!(table.find("zip").unwrap().extension, "ZIP");
        assert_eq!(table.find("ARJ").unwrap().extension, "ZIP");
        assert!(matches!(
            ArchiverTable::default().find("ZIP"),
            Err(ArchiveError::NoArchiver(_))
        ));
    }

    #[test]
    fn tgz_bundles_accumulate_packets() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("01000000.pkt");
        let p2 = dir.path().join("01000001.pkt");
        fs::write(&p1, b"first packet").unwrap();
        fs::write(&p2, b"second packet").unwrap();
        let bundle = dir.path().join("0000000a.mo0");

        let table = ArchiverTable::default();
        table.compress("tgz", &bundle, &p1).unwrap();
        table.compress("TGZ", &bundle, &p2).unwrap();
        assert_eq!(detect_archive_type(&bundle).unwrap(), Some(BUILTIN_TGZ));

        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        table.extract("TGZ", &bundle, &out).unwrap();
        assert_eq!(fs::read(out.join("01000000.pkt")).unwrap(), b"first packet");
        assert_eq!(fs::read(out.join("01000001.pkt")).unwrap(), b"second packet");
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let table = ArchiverTable::new(vec![ArchiverConfig {
            extension: "ZIP".into(),
            compress: "false %1 %2".into(),
            extract: "true %1".into(),
        }]);
        let err = table
            .compress("ZIP", &dir.path().join("b.mo0"), &dir.path().join("p.pkt"))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::CommandFailed { .. }));
        table.extract("ZIP", &dir.path().join("b.mo0"), dir.path()).unwrap();
    }
}
