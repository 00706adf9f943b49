use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use log::{error, info, warn};

use super::Pipeline;
use crate::config::MailerType;
use crate::ftn::codec::{write_stored_message, Attributes, StoredHeader, StoredMessage};
use crate::ftn::datetime::format_fido_date;
use crate::ftn::naming::{bsy_name, flo_name, BundleStatus};
use crate::ftn::FidoAddress;

const BSY_TRIES: u64 = 6;
const FIRST_NETMAIL: u32 = 2;
const LAST_NETMAIL: u32 = 10_000;

/// A `.bsy` file, removed when dropped.
struct BusyFile {
    path: PathBuf,
}

impl BusyFile {
    fn create(path: PathBuf) -> Result<Self> {
        for attempt in 1..=BSY_TRIES {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    warn!("BSY file {} already exists; will try again", path.display());
                    thread::sleep(Duration::from_millis(attempt * 50));
                }
                Err(e) => return Err(e).with_context(|| format!("creating {}", path.display())),
            }
        }
        Err(anyhow!("BSY file {} is held by another process", path.display()))
    }
}

impl Drop for BusyFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            error!("Unable to remove BSY file {}: {}", self.path.display(), e);
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Append `^<bundle>` to the flow file for `dest`, holding its busy file while writing.
pub fn write_flo_entry(
    out_dir: &Path,
    orig: &FidoAddress,
    dest: &FidoAddress,
    status: BundleStatus,
    bundle: &Path,
) -> Result<PathBuf> {
    let _busy = BusyFile::create(out_dir.join(bsy_name(orig, dest)))?;
    let flo = out_dir.join(flo_name(orig, dest, status));
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&flo)
        .with_context(|| format!("opening flow file {}", flo.display()))?;
    writeln!(file, "^{}", absolute(bundle).display())
        .with_context(|| format!("writing flow file {}", flo.display()))?;
    Ok(flo)
}

/// FTC-0053 FLAGS and the matching attribute bits for a bundle status.
fn attach_flags(status: BundleStatus) -> (Attributes, String) {
    let mut attrs = Attributes::FILE_ATTACHED | Attributes::KILL_SENT | Attributes::LOCAL;
    let mut flags = String::from("FLAGS FIL TFS PVT");
    match status {
        BundleStatus::Hold => {
            attrs |= Attributes::HOLD;
            flags.push_str(" HLD");
        }
        BundleStatus::Crash => {
            attrs |= Attributes::CRASH;
            flags.push_str(" CRA");
        }
        BundleStatus::Direct => {
            attrs |= Attributes::CRASH;
            flags.push_str(" DIR");
        }
        BundleStatus::Immediate => {
            attrs |= Attributes::CRASH;
            flags.push_str(" IMM");
        }
        BundleStatus::Normal => {}
    }
    (attrs, flags)
}

/// Write a file-attach netmail for `bundle` to the next free `<n>.msg` in `netmail_dir`.
pub fn write_attach_netmail(
    netmail_dir: &Path,
    orig: &FidoAddress,
    dest: &FidoAddress,
    status: BundleStatus,
    bundle: &Path,
    now: &DateTime<Local>,
) -> Result<PathBuf> {
    fs::create_dir_all(netmail_dir)
        .with_context(|| format!("creating {}", netmail_dir.display()))?;
    let (attribute, flags) = attach_flags(status);
    let version = env!("CARGO_PKG_VERSION");
    let bundle_path = absolute(bundle).display().to_string();

    let text = format!(
        "\u{1}{}\r\u{1}INTL {} {}\r\u{1}PID: ftngate {}\r\u{1}TID: ftngate {}\r",
        flags,
        dest.zone_net_node(),
        orig.zone_net_node(),
        version,
        version
    );
    let msg = StoredMessage {
        header: StoredHeader {
            from: format!("ftngate {}", version),
            to: "SYSOP".to_string(),
            subject: bundle_path,
            date_time: format_fido_date(now),
            dest_zone: dest.zone(),
            dest_net: dest.net(),
            dest_node: dest.node(),
            dest_point: dest.point(),
            orig_zone: orig.zone(),
            orig_net: orig.net(),
            orig_node: orig.node(),
            orig_point: orig.point(),
            attribute,
            ..Default::default()
        },
        text,
    };

    for n in FIRST_NETMAIL..LAST_NETMAIL {
        let path = netmail_dir.join(format!("{}.msg", n));
        let mut file: File = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e).with_context(|| format!("creating {}", path.display())),
        };
        write_stored_message(&mut file, &msg)?;
        return Ok(path);
    }
    Err(anyhow!("no free netmail file name in {}", netmail_dir.display()))
}

impl Pipeline {
    /// Announce `bundle` to the mailer, once per bundle per run. Failures are logged only.
    pub(crate) fn dispatch(&mut self, route_to: &FidoAddress, status: BundleStatus, bundle: &Path) -> bool {
        if !self.dispatched.insert(bundle.to_path_buf()) {
            return false;
        }
        let result = match self.net.mailer {
            MailerType::Flo => write_flo_entry(&self.net.outbound_path(), &self.address, route_to, status, bundle),
            MailerType::Attach => write_attach_netmail(
                &self.net.netmail_path(),
                &self.address,
                route_to,
                status,
                bundle,
                &self.now(),
            ),
        };
        match result {
            Ok(path) => {
                info!("Dispatched {} via {}", bundle.display(), path.display());
                true
            }
            Err(e) => {
                error!("Unable to dispatch bundle {} to {}: {:#}", bundle.display(), route_to, e);
                false
            }
        }
    }
}
