use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};

use super::{ExportStats, Pipeline};
use crate::config::RouteFallback;
use crate::dupe::compute_keys;
use crate::ftn::address::address_from_line;
use crate::ftn::codec::{Attributes, PackedHeader, PackedMessage};
use crate::ftn::datetime::daten_to_fido;
use crate::ftn::naming::BundleStatus;
use crate::ftn::{find_route, FidoAddress};
use crate::localpkt::{
    append_local_packet, main_type_name, outbound_file_name, read_local_packet_file,
    read_subscribers, subscriber_file_name, FieldReader, LocalPacket, DEAD_NET, FIELD_STOPS,
    MAIN_TYPE_EMAIL_NAME, MAIN_TYPE_NEW_POST, MAX_FIELD_LEN,
};
use crate::logutil::escape_log;
use crate::transcode::local_to_peer;

/// Strip `#NN`, `@NODE` or `(ADDR)` decorations from a local user name.
pub(crate) fn cleanup_name(name: &str) -> String {
    let cut = name.find(['#', '@', '(']).unwrap_or(name.len());
    name[..cut].trim().to_string()
}

/// `JOHN DOE` -> `John Doe`.
pub(crate) fn properize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut word_start = true;
    for c in name.chars() {
        if word_start {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        word_start = c.is_whitespace() || c == '-';
    }
    out
}

impl Pipeline {
    fn outbound_queue_path(&self) -> PathBuf {
        self.net.dir_path().join(outbound_file_name())
    }

    pub(crate) fn has_pending_export(&self) -> bool {
        self.outbound_queue_path().exists()
    }

    pub(crate) fn export_pass(&mut self) -> Result<ExportStats> {
        let mut stats = ExportStats::default();
        let path = self.outbound_queue_path();
        if !path.exists() {
            info!("No file '{}' exists to be exported to a FTN packet.", path.display());
            return Ok(stats);
        }
        let packets = read_local_packet_file(&path)
            .with_context(|| format!("reading {}", path.display()))?;

        for p in &packets {
            stats.messages += 1;
            match p.header.main_type {
                MAIN_TYPE_NEW_POST => self.export_post(p, &mut stats),
                MAIN_TYPE_EMAIL_NAME => self.export_email(p, &mut stats),
                other => {
                    error!("Unhandled type: {} ({})", main_type_name(other), other);
                    self.dead_letter(p, &mut stats);
                }
            }
        }
        self.retire_source(&path);
        Ok(stats)
    }

    fn export_post(&mut self, p: &LocalPacket, stats: &mut ExportStats) {
        let subtype = FieldReader::new(&p.text).next_field(FIELD_STOPS, MAX_FIELD_LEN);
        info!("Creating packets for subtype: {}", escape_log(&subtype));
        let subs_path = self.net.dir_path().join(subscriber_file_name(&subtype));
        let subscribers = match read_subscribers(&subs_path) {
            Ok(s) => s,
            Err(e) => {
                error!("Unable to read {}: {}", subs_path.display(), e);
                self.dead_letter(p, stats);
                return;
            }
        };
        if subscribers.is_empty() {
            info!("There are no subscribers on echo: '{}'. Nothing to do!", escape_log(&subtype));
        }
        for sub in subscribers {
            if sub == self.address {
                continue;
            }
            if let Err(e) = self.export_to(p, &sub, stats) {
                error!("Failed to export post to {}: {:#}", sub, e);
                self.dead_letter(p, stats);
            }
        }
    }

    fn export_email(&mut self, p: &LocalPacket, stats: &mut ExportStats) {
        let to = FieldReader::new(&p.text).next_field(&['\0'], MAX_FIELD_LEN);
        let Some(dest) = address_from_line(&to) else {
            error!("Unable to get address from to line: {}", escape_log(&to));
            self.dead_letter(p, stats);
            return;
        };
        if dest.node() == 0 {
            error!("Refusing to send netmail to a net host address: {}", dest);
            self.dead_letter(p, stats);
            return;
        }
        info!("Creating packet for netmail to {}", dest);
        if let Err(e) = self.export_to(p, &dest, stats) {
            error!("Failed to export email to {}: {:#}", dest, e);
            self.dead_letter(p, stats);
        }
    }

    /// Neighbour a message for `dest` is handed to, or `None` when it is unroutable.
    pub(crate) fn resolve_route(&self, dest: &FidoAddress) -> Option<FidoAddress> {
        if self.net.packet_config_for(dest).status == BundleStatus::Direct {
            return Some(dest.clone());
        }
        if let Some(via) = find_route(dest, &self.routes) {
            return Some(via);
        }
        match self.net.route_fallback {
            RouteFallback::Direct => {
                warn!("No route to {}; sending direct", dest);
                Some(dest.clone())
            }
            RouteFallback::Strict => None,
        }
    }

    fn export_to(&mut self, p: &LocalPacket, dest: &FidoAddress, stats: &mut ExportStats) -> Result<()> {
        let route_to = self
            .resolve_route(dest)
            .ok_or_else(|| anyhow!("no route to {}", dest))?;
        info!("Creating packet for: {}; route_to: {}", dest, route_to);

        let msg = self.build_outbound_message(p, dest)?;
        let route_pc = self.net.packet_config_for(&route_to).clone();
        let packet = self.create_packet(&route_to, &route_pc.password, &msg)?;
        stats.packets += 1;

        let (bundle, created) = match self.bundle_packet(&packet, &route_to, &route_pc) {
            Ok(b) => b,
            Err(e) => {
                if packet.exists() {
                    if let Err(rm) = fs::remove_file(&packet) {
                        warn!("Unable to remove unbundled packet {}: {}", packet.display(), rm);
                    }
                }
                return Err(e);
            }
        };
        if created {
            stats.bundles += 1;
        }

        if !p.is_email() {
            if let Err(e) = self.dupes.record(compute_keys(&msg)) {
                error!("Unable to record outbound post in duplicate store: {}", e);
            }
        }
        if self.dispatch(&route_to, route_pc.status, &bundle) {
            stats.dispatched += 1;
        }
        Ok(())
    }

    /// Build the FTN message for one local message addressed to `dest`.
    pub(crate) fn build_outbound_message(&mut self, p: &LocalPacket, dest: &FidoAddress) -> Result<PackedMessage> {
        let is_email = p.is_email();
        let mut r = FieldReader::new(&p.text);
        let (to_user, subtype) = if is_email {
            (cleanup_name(&r.next_field(FIELD_STOPS, MAX_FIELD_LEN)), String::new())
        } else {
            (String::new(), r.next_field(FIELD_STOPS, MAX_FIELD_LEN))
        };
        let title = r.next_field(FIELD_STOPS, MAX_FIELD_LEN);
        let sender = cleanup_name(&r.next_field(FIELD_STOPS, MAX_FIELD_LEN));
        let _date_line = r.next_field(FIELD_STOPS, MAX_FIELD_LEN);
        if !is_email && r.starts_with("BY: ") {
            r.next_field(&['\r', '\n'], MAX_FIELD_LEN);
        }
        let body = local_to_peer(r.rest(), &self.net.transcode);

        let orig = &self.address;
        let msgid = self.msgids.next_id(orig)?;
        let version = env!("CARGO_PKG_VERSION");

        let mut text = String::with_capacity(body.len() + 256);
        if is_email {
            text.push_str(&format!("\u{1}INTL {} {}\r", dest.zone_net_node(), orig.zone_net_node()));
            if orig.point() != 0 {
                text.push_str(&format!("\u{1}FMPT {}\r", orig.point()));
            }
            if dest.point() != 0 {
                text.push_str(&format!("\u{1}TOPT {}\r", dest.point()));
            }
        } else {
            text.push_str(&format!("AREA:{}\r", subtype));
        }
        text.push_str(&format!("\u{1}PID: ftngate {}\r", version));
        text.push_str(&format!("\u{1}TID: ftngate {}\r", version));
        text.push_str(&format!("\u{1}MSGID: {}\r", msgid));
        text.push_str(&body);

        let origin = if self.net.origin_line.is_empty() {
            &self.system_name
        } else {
            &self.net.origin_line
        };
        text.push_str(&format!("--- ftngate {}\r", version));
        text.push_str(&format!(" * Origin: {} ({})\r", origin, orig.zone_net_node()));
        if !is_email {
            text.push_str(&format!("SEEN-BY: {}\r", orig.net_node()));
        }

        let mut attribute = Attributes::LOCAL;
        if is_email {
            attribute |= Attributes::PRIVATE;
        }
        Ok(PackedMessage {
            header: PackedHeader {
                orig_net: orig.net(),
                orig_node: orig.node(),
                dest_net: dest.net(),
                dest_node: dest.node(),
                attribute,
                ..Default::default()
            },
            date_time: daten_to_fido(p.header.daten),
            to_user_name: if to_user.is_empty() { "All".to_string() } else { properize(&to_user) },
            from_user_name: sender,
            subject: title,
            text,
        })
    }

    /// Park a message that cannot be exported in `DEAD.NET`.
    fn dead_letter(&self, p: &LocalPacket, stats: &mut ExportStats) {
        let path = self.net.dir_path().join(DEAD_NET);
        match append_local_packet(&path, p) {
            Ok(()) => {
                warn!("Wrote message to {}", path.display());
                stats.dead_lettered += 1;
            }
            Err(e) => error!("Error writing to {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_up_local_names() {
        assert_eq!(cleanup_name("SYSOP #1"), "SYSOP");
        assert_eq!(cleanup_name("Bob @2"), "Bob");
        assert_eq!(cleanup_name("JOHN DOE (1:2/3)"), "JOHN DOE");
        assert_eq!(cleanup_name("  plain  "), "plain");
    }

    #[test]
    fn properizes_names() {
        assert_eq!(properize("JOHN DOE"), "John Doe");
        assert_eq!(properize("mary-ann smith"), "Mary-Ann Smith");
        assert_eq!(properize(""), "");
    }
}
