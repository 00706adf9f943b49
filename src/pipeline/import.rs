use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use log::{debug, error, info, warn};

use super::{file_name_of, list_files, move_into, ImportStats, Pipeline};
use crate::archiver::detect_archive_type;
use crate::dupe::compute_keys;
use crate::ftn::address::address_from_origin_line;
use crate::ftn::codec::{read_packed_message, read_packet_header, Attributes, PackedMessage, PacketHeader};
use crate::ftn::datetime::{daten_to_local_time, fido_to_daten, parse_fido_date};
use crate::ftn::naming::is_inbound_name;
use crate::ftn::FidoAddress;
use crate::localpkt::{
    append_local_packet, LocalPacket, NetHeader, FAKE_OUTBOUND_NODE, LOCAL_NET,
    MAIN_TYPE_EMAIL_NAME, MAIN_TYPE_NEW_POST,
};
use crate::logutil::escape_log;
use crate::transcode::peer_to_local;

/// What happened to one inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PacketOutcome {
    Imported,
    Quarantined,
}

/// What happened to one message inside a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MessageOutcome {
    Imported,
    Duplicate,
    TooOld,
    Deleted,
    Skipped,
}

fn is_packet_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".pkt")
}

/// The echo tag on the `AREA:` line of an FTN body.
fn echo_area(text: &str) -> Option<String> {
    text.split(['\r', '\n'])
        .find_map(|line| line.strip_prefix("AREA:"))
        .map(|area| area.trim().to_string())
        .filter(|area| !area.is_empty())
}

impl Pipeline {
    pub(crate) fn has_pending_import(&self) -> Result<bool> {
        let inbound = self.net.inbound_path();
        Ok(list_files(&inbound)
            .with_context(|| format!("listing {}", inbound.display()))?
            .iter()
            .any(|p| is_inbound_name(&file_name_of(p))))
    }

    pub(crate) fn import_pass(&mut self) -> Result<ImportStats> {
        let mut stats = ImportStats::default();
        let inbound = self.net.inbound_path();
        let temp = self.net.temp_inbound_path();
        fs::create_dir_all(&temp).with_context(|| format!("creating {}", temp.display()))?;

        // Packets left behind by an interrupted earlier run go first.
        self.import_loose_packets(&temp, &mut stats)?;

        let files = list_files(&inbound).with_context(|| format!("listing {}", inbound.display()))?;
        if files.is_empty() {
            info!("No bundles to import in {}", inbound.display());
        }
        for path in files {
            let name = file_name_of(&path);
            if !is_inbound_name(&name) {
                continue;
            }
            if fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true) {
                debug!("Skipping empty file {}", path.display());
                continue;
            }
            if is_packet_name(&name) {
                self.import_one_packet(&path, &mut stats);
            } else {
                match self.import_bundle(&path, &mut stats) {
                    Ok(()) => {
                        info!("Successfully imported bundle: {}", path.display());
                        stats.bundles += 1;
                        self.retire_source(&path);
                    }
                    Err(e) => {
                        error!("Failed to import bundle {}: {:#}", path.display(), e);
                        stats.failed += 1;
                    }
                }
            }
        }
        Ok(stats)
    }

    fn import_loose_packets(&mut self, dir: &Path, stats: &mut ImportStats) -> Result<()> {
        let files = list_files(dir).with_context(|| format!("listing {}", dir.display()))?;
        for path in files.into_iter().filter(|p| is_packet_name(&file_name_of(p))) {
            self.import_one_packet(&path, stats);
        }
        Ok(())
    }

    fn import_bundle(&mut self, path: &Path, stats: &mut ImportStats) -> Result<()> {
        let kind = match detect_archive_type(path)? {
            Some(kind) => kind.to_string(),
            None => {
                info!(
                    "Unable to determine archive type of {}; assuming {}",
                    path.display(),
                    self.net.packet.compression
                );
                self.net.packet.compression.clone()
            }
        };
        let temp = self.net.temp_inbound_path();
        self.archiver.extract(&kind, path, &temp)?;
        self.import_loose_packets(&temp, stats)
    }

    /// Import one packet file and retire or quarantine it. Never fails the run.
    fn import_one_packet(&mut self, path: &Path, stats: &mut ImportStats) {
        match self.import_packet_file(path, stats) {
            Ok(PacketOutcome::Imported) => {
                info!("Successfully imported packet: {}", path.display());
                stats.packets += 1;
                self.retire_source(path);
            }
            Ok(PacketOutcome::Quarantined) => stats.quarantined += 1,
            Err(e) => {
                error!("Error reading packet {}: {:#}", path.display(), e);
                stats.failed += 1;
                self.quarantine(path);
            }
        }
    }

    fn quarantine(&self, path: &Path) {
        let bad = self.net.bad_packets_path();
        match move_into(path, &bad) {
            Ok(dest) => warn!("Moved {} to {}", path.display(), dest.display()),
            Err(e) => error!("Error moving {} to {}: {}", path.display(), bad.display(), e),
        }
    }

    pub(crate) fn import_packet_file(&mut self, path: &Path, stats: &mut ImportStats) -> Result<PacketOutcome> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let header = read_packet_header(&mut reader)?;
        let from = header.orig_address();

        let expected = &self.net.packet_config_for(&from).password;
        if !expected.eq_ignore_ascii_case(&header.password) {
            error!(
                "Unexpected packet password from node {}; actual: '{}'; expected: '{}'",
                from,
                escape_log(&header.password),
                escape_log(expected)
            );
            drop(reader);
            self.quarantine(path);
            return Ok(PacketOutcome::Quarantined);
        }

        let mut write_errors = 0u32;
        while let Some(msg) = read_packed_message(&mut reader)? {
            let subject = escape_log(&msg.subject);
            match self.import_message(&header, msg) {
                Ok(MessageOutcome::Imported) => stats.imported += 1,
                Ok(MessageOutcome::Duplicate) => stats.duplicates += 1,
                Ok(MessageOutcome::TooOld) => stats.too_old += 1,
                Ok(MessageOutcome::Deleted) => stats.deleted += 1,
                Ok(MessageOutcome::Skipped) => stats.failed += 1,
                Err(e) => {
                    error!("Error importing message '{}': {:#}", subject, e);
                    stats.failed += 1;
                    write_errors += 1;
                }
            }
        }
        if write_errors > 0 {
            // Keep the packet so the lost messages can be imported again; the ones that did
            // make it are in the duplicate store and will be skipped.
            warn!("{} message(s) from {} could not be stored", write_errors, path.display());
            drop(reader);
            self.quarantine(path);
            return Ok(PacketOutcome::Quarantined);
        }
        Ok(PacketOutcome::Imported)
    }

    fn is_too_old(&self, date_time: &str) -> bool {
        if self.net.max_age_days == 0 {
            return false;
        }
        match parse_fido_date(date_time) {
            Some(when) => self.now() - when > Duration::days(i64::from(self.net.max_age_days)),
            None => false,
        }
    }

    pub(crate) fn import_message(&mut self, header: &PacketHeader, msg: PackedMessage) -> Result<MessageOutcome> {
        if msg.header.attribute.contains(Attributes::DELETED) {
            debug!("Skipping deleted message '{}'", escape_log(&msg.subject));
            return Ok(MessageOutcome::Deleted);
        }
        let is_email = msg.is_private();

        // Posts only enter the duplicate store once they are safely in LOCAL.NET (or dropped
        // for age), so a failed write leaves the message importable on the next try.
        let keys = if is_email { None } else { Some(compute_keys(&msg)) };
        if let Some(keys) = &keys {
            if self.dupes.is_duplicate(keys) {
                info!("Skipping duplicate FTN message: {}", escape_log(&msg.subject));
                return Ok(MessageOutcome::Duplicate);
            }
        }

        if self.is_too_old(&msg.date_time) {
            if let Some(keys) = keys {
                self.dupes.record(keys)?;
            }
            info!(
                "Skipping message '{}' dated {}: older than {} days",
                escape_log(&msg.subject),
                escape_log(&msg.date_time),
                self.net.max_age_days
            );
            return Ok(MessageOutcome::TooOld);
        }

        let first_field = if is_email {
            msg.to_user_name.clone()
        } else {
            match echo_area(&msg.text) {
                Some(area) => area,
                None => {
                    warn!("Post '{}' has no AREA line; skipping", escape_log(&msg.subject));
                    return Ok(MessageOutcome::Skipped);
                }
            }
        };

        let from_address = address_from_origin_line(&msg.text).unwrap_or_else(|| {
            let packet_from = header.orig_address();
            FidoAddress::new(packet_from.zone(), msg.header.orig_net, msg.header.orig_node, 0)
        });
        let daten = fido_to_daten(&msg.date_time)
            .unwrap_or_else(|| self.now().timestamp().max(0) as u32);

        // TO_OR_SUBTYPE \0 TITLE \0 SENDER (ADDR) \r\n DATE \r\n TEXT
        let mut text = String::with_capacity(msg.text.len() + 128);
        text.push_str(&first_field);
        text.push('\0');
        text.push_str(&msg.subject);
        text.push('\0');
        text.push_str(&format!("{} ({})\r\n", msg.from_user_name, from_address));
        text.push_str(&daten_to_local_time(daten));
        text.push_str("\r\n");
        text.push_str(&peer_to_local(&msg.text));

        let nh = NetHeader {
            tosys: 1,
            touser: 0,
            fromsys: FAKE_OUTBOUND_NODE,
            fromuser: 0,
            main_type: if is_email { MAIN_TYPE_EMAIL_NAME } else { MAIN_TYPE_NEW_POST },
            minor_type: 0,
            daten,
            method: 0,
            ..Default::default()
        };
        let local = LocalPacket::new(nh, Vec::new(), text);
        let local_net = self.net.dir_path().join(LOCAL_NET);
        append_local_packet(&local_net, &local)
            .map_err(|e| anyhow!("writing {}: {}", local_net.display(), e))?;
        if let Some(keys) = keys {
            self.dupes.record(keys)?;
        }

        if is_email {
            info!("     + Imported Email '{}' to '{}'", escape_log(&msg.subject), escape_log(&first_field));
        } else {
            info!("     + Imported Post '{}' in area '{}'", escape_log(&msg.subject), escape_log(&first_field));
        }
        Ok(MessageOutcome::Imported)
    }
}
