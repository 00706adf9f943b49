//! # Configuration
//!
//! `ftngate` reads a single TOML file. Every optional key has a default, so a minimal
//! file only needs one `[[networks]]` table with a `name`, `dir` and `fido_address`.
//!
//! ```toml
//! [system]
//! name = "My BBS"
//! data_dir = "./data"
//!
//! [logging]
//! level = "info"
//! file = "ftngate.log"
//!
//! [[archivers]]
//! extension = "ZIP"
//! compress = "zip -j -q %1 %2"
//! extract = "unzip -o -j -q %1"
//!
//! [[networks]]
//! name = "fidonet"
//! dir = "/bbs/fidonet"
//! fido_address = "1:218/700"
//! origin_line = "My BBS, telnet bbs.example.com"
//! mailer = "flo"
//! route_fallback = "strict"
//!
//! [networks.packet]
//! compression = "ZIP"
//! password = "SECRET"
//!
//! [[networks.nodes]]
//! address = "1:218/1"
//! routes = "1:* !1:218/999"
//! ```
//!
//! Directory keys of a network are resolved against its `dir` unless they are absolute.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::ftn::naming::BundleStatus;
use crate::ftn::{parse_address, FidoAddress, RouteEntry};
use crate::transcode::TranscodeOptions;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub archivers: Vec<ArchiverConfig>,
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// BBS name, used when a network has no origin line.
    #[serde(default = "default_system_name")]
    pub name: String,
    /// Home of the duplicate store and the MSGID counter.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_system_name() -> String {
    "ftngate BBS".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self { name: default_system_name(), data_dir: default_data_dir() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), file: None }
    }
}

/// External archive tool. `%1` is the bundle path, `%2` the packet path, `%%` a literal `%`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiverConfig {
    pub extension: String,
    pub compress: String,
    pub extract: String,
}

/// How bundles are announced to the mailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailerType {
    /// BinkleyTerm style flow files.
    #[default]
    Flo,
    /// File-attach netmail in the netmail directory.
    Attach,
}

/// What to do when no neighbour's route mask matches a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteFallback {
    /// Unroutable; the message goes to DEAD.NET.
    #[default]
    Strict,
    /// Send straight to the destination.
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketConfig {
    /// Archive type for bundles (`PKT` = uncompressed packet).
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub status: BundleStatus,
}

fn default_compression() -> String {
    crate::archiver::NO_COMPRESSION.to_string()
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            compression: default_compression(),
            password: String::new(),
            status: BundleStatus::Normal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub address: String,
    /// Space separated route mask, e.g. `1:* !1:2/3`.
    #[serde(default)]
    pub routes: String,
    #[serde(default)]
    pub packet: Option<PacketConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub dir: String,
    pub fido_address: String,
    #[serde(default)]
    pub origin_line: String,

    #[serde(default = "default_inbound_dir")]
    pub inbound_dir: String,
    #[serde(default = "default_temp_inbound_dir")]
    pub temp_inbound_dir: String,
    #[serde(default = "default_temp_outbound_dir")]
    pub temp_outbound_dir: String,
    #[serde(default = "default_outbound_dir")]
    pub outbound_dir: String,
    #[serde(default = "default_netmail_dir")]
    pub netmail_dir: String,
    #[serde(default = "default_bad_packets_dir")]
    pub bad_packets_dir: String,
    /// Processed inbound files and outbound queues are moved here instead of deleted.
    #[serde(default)]
    pub archive_dir: Option<String>,

    #[serde(default)]
    pub mailer: MailerType,
    #[serde(default)]
    pub route_fallback: RouteFallback,
    /// Messages older than this are dropped on import; 0 disables the check.
    #[serde(default)]
    pub max_age_days: u32,
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    #[serde(default = "default_max_passes")]
    pub max_passes: u32,

    #[serde(default)]
    pub packet: PacketConfig,
    #[serde(default)]
    pub transcode: TranscodeOptions,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

fn default_inbound_dir() -> String { "in".to_string() }
fn default_temp_inbound_dir() -> String { "temp_in".to_string() }
fn default_temp_outbound_dir() -> String { "temp_out".to_string() }
fn default_outbound_dir() -> String { "out".to_string() }
fn default_netmail_dir() -> String { "netmail".to_string() }
fn default_bad_packets_dir() -> String { "badpackets".to_string() }
fn default_lock_timeout_secs() -> u64 { 30 }
fn default_max_passes() -> u32 { 3 }

impl NetworkConfig {
    /// A network with every optional key at its default.
    pub fn new(name: &str, dir: impl Into<String>, fido_address: &str) -> Self {
        Self {
            name: name.to_string(),
            dir: dir.into(),
            fido_address: fido_address.to_string(),
            origin_line: String::new(),
            inbound_dir: default_inbound_dir(),
            temp_inbound_dir: default_temp_inbound_dir(),
            temp_outbound_dir: default_temp_outbound_dir(),
            outbound_dir: default_outbound_dir(),
            netmail_dir: default_netmail_dir(),
            bad_packets_dir: default_bad_packets_dir(),
            archive_dir: None,
            mailer: MailerType::default(),
            route_fallback: RouteFallback::default(),
            max_age_days: 0,
            lock_timeout_secs: default_lock_timeout_secs(),
            max_passes: default_max_passes(),
            packet: PacketConfig::default(),
            transcode: TranscodeOptions::default(),
            nodes: Vec::new(),
        }
    }

    pub fn dir_path(&self) -> PathBuf {
        PathBuf::from(&self.dir)
    }

    /// Resolve a configured directory against the network directory.
    pub fn resolve(&self, sub: &str) -> PathBuf {
        let p = Path::new(sub);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.dir_path().join(p)
        }
    }

    pub fn inbound_path(&self) -> PathBuf { self.resolve(&self.inbound_dir) }
    pub fn temp_inbound_path(&self) -> PathBuf { self.resolve(&self.temp_inbound_dir) }
    pub fn temp_outbound_path(&self) -> PathBuf { self.resolve(&self.temp_outbound_dir) }
    pub fn outbound_path(&self) -> PathBuf { self.resolve(&self.outbound_dir) }
    pub fn netmail_path(&self) -> PathBuf { self.resolve(&self.netmail_dir) }
    pub fn bad_packets_path(&self) -> PathBuf { self.resolve(&self.bad_packets_dir) }
    pub fn archive_path(&self) -> Option<PathBuf> {
        self.archive_dir.as_deref().map(|d| self.resolve(d))
    }

    pub fn address(&self) -> Result<FidoAddress> {
        parse_address(&self.fido_address)
            .with_context(|| format!("network '{}': bad fido_address", self.name))
    }

    /// Neighbour table in configured order.
    pub fn route_table(&self) -> Result<Vec<RouteEntry>> {
        self.nodes
            .iter()
            .map(|n| {
                let a = parse_address(&n.address).with_context(|| {
                    format!("network '{}': bad node address '{}'", self.name, n.address)
                })?;
                Ok(RouteEntry::new(a, n.routes.clone()))
            })
            .collect()
    }

    /// Packet settings for `address`: the node's own override, else the network default.
    pub fn packet_config_for(&self, address: &FidoAddress) -> &PacketConfig {
        self.nodes
            .iter()
            .filter(|n| parse_address(&n.address).map_or(false, |a| a == *address))
            .find_map(|n| n.packet.as_ref())
            .unwrap_or(&self.packet)
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config
            .validate()
            .map_err(|e| anyhow!("Invalid config file {}: {:#}", path, e))?;
        Ok(config)
    }

    /// Check the values serde cannot: addresses and the network list.
    pub fn validate(&self) -> Result<()> {
        if self.networks.is_empty() {
            return Err(anyhow!("no [[networks]] configured"));
        }
        for net in &self.networks {
            net.address()?;
            net.route_table()?;
            if net.max_passes == 0 {
                return Err(anyhow!("network '{}': max_passes must be at least 1", net.name));
            }
        }
        Ok(())
    }

    /// The named network, or the first one when `name` is `None`.
    pub fn network(&self, name: Option<&str>) -> Result<&NetworkConfig> {
        match name {
            Some(n) => self
                .networks
                .iter()
                .find(|net| net.name.eq_ignore_ascii_case(n))
                .ok_or_else(|| anyhow!("no network named '{}' in config", n)),
            None => self
                .networks
                .first()
                .ok_or_else(|| anyhow!("no [[networks]] configured")),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.system.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[[networks]]
name = "fidonet"
dir = "/bbs/fidonet"
fido_address = "1:218/700"
"#;

    #[test]
    fn minimal_config_takes_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        let net = config.network(None).unwrap();
        assert_eq!(net.mailer, MailerType::Flo);
        assert_eq!(net.route_fallback, RouteFallback::Strict);
        assert_eq!(net.packet.compression, "PKT");
        assert_eq!(net.lock_timeout_secs, 30);
        assert_eq!(net.max_passes, 3);
        assert_eq!(net.inbound_path(), PathBuf::from("/bbs/fidonet/in"));
        assert_eq!(config.system.data_dir, "./data");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn node_overrides_and_route_table() {
        let text = format!(
            "{}\n{}",
            MINIMAL,
            r#"
[networks.packet]
compression = "ZIP"
password = "default"

[[networks.nodes]]
address = "1:218/1"
routes = "1:* !1:2/3"

[[networks.nodes]]
address = "1:100/1"
[networks.nodes.packet]
compression = "PKT"
password = "Secret1"
status = "crash"
"#
        );
        let config: Config = toml::from_str(&text).unwrap();
        let net = config.network(Some("FIDONET")).unwrap();
        let table = net.route_table().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].routes, "1:* !1:2/3");

        let hub = FidoAddress::new(1, 218, 1, 0);
        let leaf = FidoAddress::new(1, 100, 1, 0);
        assert_eq!(net.packet_config_for(&hub).password, "default");
        assert_eq!(net.packet_config_for(&leaf).password, "Secret1");
        assert_eq!(net.packet_config_for(&leaf).status, BundleStatus::Crash);
    }

    #[test]
    fn validation_rejects_bad_addresses() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.networks[0].fido_address = "nonsense".into();
        assert!(config.validate().is_err());
        assert!(Config::default().validate().is_err());
        assert!(config.network(Some("othernet")).is_err());
    }

    #[tokio::test]
    async fn load_reports_path_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let err = Config::load(path.to_str().unwrap()).await.unwrap_err();
        assert!(err.to_string().contains("config.toml"));

        tokio::fs::write(&path, MINIMAL).await.unwrap();
        let config = Config::load(path.to_str().unwrap()).await.unwrap();
        assert_eq!(config.networks[0].name, "fidonet");
    }
}
