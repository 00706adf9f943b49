//! File names for packets, bundles, flow files and busy files.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};

use super::address::FidoAddress;

const DAY_PREFIXES: [&str; 7] = ["su", "mo", "tu", "we", "th", "fr", "sa"];
const SEQUENCE_SUFFIXES: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Number of distinct bundle names available for one source/destination pair on one day.
pub const MAX_BUNDLE_NAMES: u32 = (DAY_PREFIXES.len() * SEQUENCE_SUFFIXES.len()) as u32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamingError {
    #[error("bundle names exhausted after {0} candidates")]
    Exhausted(u32),
}

/// Delivery priority of a bundle. Selects the flow-file extension and the attach flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleStatus {
    #[default]
    Normal,
    Crash,
    Direct,
    Immediate,
    Hold,
}

impl BundleStatus {
    /// First character of the flow-file extension.
    pub fn flow_char(self) -> char {
        match self {
            BundleStatus::Crash => 'c',
            BundleStatus::Normal => 'f',
            BundleStatus::Direct => 'd',
            BundleStatus::Immediate => 'i',
            BundleStatus::Hold => 'h',
        }
    }
}

impl fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BundleStatus::Normal => "normal",
            BundleStatus::Crash => "crash",
            BundleStatus::Direct => "direct",
            BundleStatus::Immediate => "immediate",
            BundleStatus::Hold => "hold",
        };
        f.write_str(s)
    }
}

impl FromStr for BundleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" | "" => Ok(BundleStatus::Normal),
            "crash" => Ok(BundleStatus::Crash),
            "direct" => Ok(BundleStatus::Direct),
            "immediate" => Ok(BundleStatus::Immediate),
            "hold" => Ok(BundleStatus::Hold),
            other => Err(format!("unknown bundle status '{}'", other)),
        }
    }
}

/// Packet file name for `now`: `DDHHMMSS.pkt`.
pub fn packet_name(now: &DateTime<Local>) -> String {
    format!(
        "{:02}{:02}{:02}{:02}.pkt",
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

/// The eight hex digit base shared by bundle, flow and busy files.
pub fn net_node_base(orig: &FidoAddress, dest: &FidoAddress) -> String {
    format!(
        "{:04x}{:04x}",
        orig.net() ^ dest.net(),
        orig.node() ^ dest.node()
    )
}

/// Bundle name candidate `seq` for a bundle sent on `now`.
///
/// Candidates start at today's day prefix and move on to the next day's prefix after 36
/// suffixes, giving [`MAX_BUNDLE_NAMES`] names before exhaustion.
pub fn bundle_name(
    orig: &FidoAddress,
    dest: &FidoAddress,
    now: &DateTime<Local>,
    seq: u32,
) -> Result<String, NamingError> {
    if seq >= MAX_BUNDLE_NAMES {
        return Err(NamingError::Exhausted(MAX_BUNDLE_NAMES));
    }
    let suffixes = SEQUENCE_SUFFIXES.len() as u32;
    let dow = now.weekday().num_days_from_sunday();
    let prefix = DAY_PREFIXES[((dow + seq / suffixes) % 7) as usize];
    let suffix = SEQUENCE_SUFFIXES[(seq % suffixes) as usize] as char;
    Ok(format!("{}.{}{}", net_node_base(orig, dest), prefix, suffix))
}

/// Flow file name, e.g. `0000000a.flo` for normal priority.
pub fn flo_name(orig: &FidoAddress, dest: &FidoAddress, status: BundleStatus) -> String {
    format!("{}.{}lo", net_node_base(orig, dest), status.flow_char())
}

pub fn bsy_name(orig: &FidoAddress, dest: &FidoAddress) -> String {
    format!("{}.bsy", net_node_base(orig, dest))
}

/// True when `file_name` has an inbound bundle (`su0`..`saz`) or packet extension.
pub fn is_inbound_name(file_name: &str) -> bool {
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    if ext == "pkt" {
        return true;
    }
    ext.len() == 3
        && DAY_PREFIXES.iter().any(|p| ext.starts_with(p))
        && ext.as_bytes()[2].is_ascii_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn addrs() -> (FidoAddress, FidoAddress) {
        (FidoAddress::new(1, 218, 700, 0), FidoAddress::new(1, 100, 1, 0))
    }

    #[test]
    fn packet_names_use_day_and_time() {
        let now = Local.with_ymd_and_hms(2016, 1, 4, 7, 2, 9).unwrap();
        assert_eq!(packet_name(&now), "04070209.pkt");
    }

    #[test]
    fn bundle_names_xor_net_and_node() {
        let (o, d) = addrs();
        // 2016-01-04 is a Monday.
        let now = Local.with_ymd_and_hms(2016, 1, 4, 7, 2, 9).unwrap();
        assert_eq!(bundle_name(&o, &d, &now, 0).unwrap(), "00be02bd.mo0");
        assert_eq!(bundle_name(&o, &d, &now, 35).unwrap(), "00be02bd.moz");
        assert_eq!(bundle_name(&o, &d, &now, 36).unwrap(), "00be02bd.tu0");
        assert_eq!(flo_name(&o, &d, BundleStatus::Crash), "00be02bd.clo");
        assert_eq!(flo_name(&o, &d, BundleStatus::Normal), "00be02bd.flo");
        assert_eq!(bsy_name(&o, &d), "00be02bd.bsy");
    }

    #[test]
    fn bundle_names_exhaust_after_252() {
        let (o, d) = addrs();
        let now = Local.with_ymd_and_hms(2016, 1, 9, 0, 0, 0).unwrap();
        let names: HashSet<String> = (0..MAX_BUNDLE_NAMES)
            .map(|seq| bundle_name(&o, &d, &now, seq).unwrap())
            .collect();
        assert_eq!(names.len(), 252);
        assert_eq!(
            bundle_name(&o, &d, &now, 252),
            Err(NamingError::Exhausted(252))
        );
        assert!(bundle_name(&o, &d, &now, 1000).is_err());
    }

    #[test]
    fn recognises_inbound_extensions() {
        assert!(is_inbound_name("00be02bd.mo0"));
        assert!(is_inbound_name("00BE02BD.SAZ"));
        assert!(is_inbound_name("04070209.pkt"));
        assert!(!is_inbound_name("00be02bd.flo"));
        assert!(!is_inbound_name("readme"));
        assert!(!is_inbound_name("x.mo"));
        assert!(!is_inbound_name("x.zip"));
    }

    #[test]
    fn bundle_status_parses_case_insensitively() {
        assert_eq!("CRASH".parse::<BundleStatus>(), Ok(BundleStatus::Crash));
        assert_eq!("".parse::<BundleStatus>(), Ok(BundleStatus::Normal));
        assert!("urgent".parse::<BundleStatus>().is_err());
    }
}
