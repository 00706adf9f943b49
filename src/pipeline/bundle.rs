use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use log::{debug, error, info};

use super::{file_name_of, move_file, Pipeline};
use crate::archiver::NO_COMPRESSION;
use crate::config::PacketConfig;
use crate::ftn::codec::{write_packed_message, write_packet_header, write_packet_terminator, PackedMessage, PacketHeader};
use crate::ftn::naming::{bundle_name, packet_name};
use crate::ftn::FidoAddress;

const PACKET_CREATE_TRIES: u32 = 10;

/// Alternative names for a packet whose name is taken: the last stem character is replaced
/// by `a`..`z` in turn.
fn renamed_candidates(name: &str) -> Vec<String> {
    let (stem, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    let Some(last) = stem.char_indices().last() else {
        return Vec::new();
    };
    let base = &stem[..last.0];
    ('a'..='z')
        .map(|c| {
            if ext.is_empty() {
                format!("{}{}", base, c)
            } else {
                format!("{}{}.{}", base, c, ext)
            }
        })
        .collect()
}

impl Pipeline {
    /// Write a one-message packet for `route_to` into the temporary outbound directory.
    ///
    /// The name comes from the clock. Names already handed out this run are skipped, and a
    /// name taken on disk is retried one second later, up to ten times, using exclusive
    /// create so no existing packet is ever overwritten.
    pub(crate) fn create_packet(
        &mut self,
        route_to: &FidoAddress,
        password: &str,
        msg: &PackedMessage,
    ) -> Result<PathBuf> {
        let temp = self.net.temp_outbound_path();
        fs::create_dir_all(&temp).with_context(|| format!("creating {}", temp.display()))?;
        let now = self.now();
        let mut collisions = 0;
        let mut offset = 0;
        while collisions < PACKET_CREATE_TRIES {
            let name = packet_name(&(now + Duration::seconds(offset)));
            offset += 1;
            if self.packet_names.contains(&name) {
                continue;
            }
            let path = temp.join(&name);
            let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("Packet name {} taken; trying the next one", path.display());
                    collisions += 1;
                    continue;
                }
                Err(e) => return Err(e).with_context(|| format!("creating {}", path.display())),
            };
            self.packet_names.insert(name);
            let header = PacketHeader::type2_plus(&self.address, route_to, &now, password);
            let mut w = BufWriter::new(file);
            write_packet_header(&mut w, &header)?;
            write_packed_message(&mut w, msg)?;
            write_packet_terminator(&mut w)?;
            w.flush().with_context(|| format!("writing {}", path.display()))?;
            return Ok(path);
        }
        Err(anyhow!(
            "unable to create a packet file in {} after {} tries",
            temp.display(),
            PACKET_CREATE_TRIES
        ))
    }

    /// Turn `packet` into a bundle for `route_to` in the outbound directory.
    ///
    /// With `PKT` compression the packet itself is moved into place. Otherwise the packet is
    /// added to this run's open bundle for the same neighbour and status, or to a new bundle
    /// under the first free day/sequence name. The returned flag is true for a new bundle.
    pub(crate) fn bundle_packet(
        &mut self,
        packet: &Path,
        route_to: &FidoAddress,
        pc: &PacketConfig,
    ) -> Result<(PathBuf, bool)> {
        let out = self.net.outbound_path();
        fs::create_dir_all(&out).with_context(|| format!("creating {}", out.display()))?;

        if pc.compression.eq_ignore_ascii_case(NO_COMPRESSION) {
            let name = file_name_of(packet);
            let dest = std::iter::once(name.clone())
                .chain(renamed_candidates(&name))
                .map(|n| out.join(n))
                .find(|p| !p.exists())
                .ok_or_else(|| anyhow!("no free name for packet {} in {}", name, out.display()))?;
            move_file(packet, &dest).with_context(|| {
                format!("moving {} to {}", packet.display(), dest.display())
            })?;
            info!("Created bundle(packet): {}", dest.display());
            return Ok((dest, true));
        }

        let key = (route_to.clone(), pc.status);
        if let Some(existing) = self.open_bundles.get(&key).cloned() {
            self.compress_into(&pc.compression, &existing, packet)?;
            info!("Added packet to bundle: {}", existing.display());
            return Ok((existing, false));
        }

        let now = self.now();
        let mut seq = 0;
        let bundle = loop {
            let candidate = out.join(bundle_name(&self.address, route_to, &now, seq)?);
            if !candidate.exists() {
                break candidate;
            }
            debug!("Skipping candidate bundle: {}", candidate.display());
            seq += 1;
        };
        self.compress_into(&pc.compression, &bundle, packet)?;
        info!("Created bundle: {}", bundle.display());
        self.open_bundles.insert(key, bundle.clone());
        Ok((bundle, true))
    }

    fn compress_into(&self, kind: &str, bundle: &Path, packet: &Path) -> Result<()> {
        let result = self.archiver.compress(kind, bundle, packet);
        if let Err(e) = fs::remove_file(packet) {
            error!("Error removing packet {}: {}", packet.display(), e);
        }
        result.with_context(|| format!("adding {} to {}", packet.display(), bundle.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renamed_candidates_rotate_last_character() {
        let c = renamed_candidates("04070209.pkt");
        assert_eq!(c.len(), 26);
        assert_eq!(c[0], "0407020a.pkt");
        assert_eq!(c[25], "0407020z.pkt");
        assert!(renamed_candidates(".pkt").is_empty());
    }
}
