//! Test utilities & fixtures.
//! Builds a throwaway network directory tree plus the config pointing at it, and writes the
//! packets and local queue entries the integration tests feed through the pipeline.
#![allow(dead_code)] // each test crate uses a different subset

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeZone};

use ftngate::archiver::ArchiverTable;
use ftngate::config::{Config, NetworkConfig, NodeConfig, PacketConfig};
use ftngate::ftn::{
    write_packed_message, write_packet_header, write_packet_terminator, Attributes, FidoAddress,
    PackedHeader, PackedMessage, PacketHeader,
};
use ftngate::localpkt::{
    append_local_packet, outbound_file_name, LocalPacket, NetHeader, MAIN_TYPE_EMAIL_NAME,
    MAIN_TYPE_NEW_POST,
};
use ftngate::pipeline::Pipeline;

pub const OUR_ADDRESS: &str = "21:1/101";
pub const HUB_ADDRESS: &str = "21:1/100";

pub struct TestNet {
    pub tmp: tempfile::TempDir,
    pub config: Config,
}

impl TestNet {
    /// A network at `21:1/101` whose only neighbour is the hub `21:1/100`, routing all of
    /// zone 21 and sharing the packet password `SECRET1`.
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let net_dir = tmp.path().join("fsxnet");
        fs::create_dir_all(&net_dir).unwrap();

        let mut net = NetworkConfig::new("fsxnet", net_dir.display().to_string(), OUR_ADDRESS);
        net.origin_line = "Test BBS".to_string();
        net.nodes.push(NodeConfig {
            address: HUB_ADDRESS.to_string(),
            routes: "21:*".to_string(),
            packet: Some(PacketConfig {
                password: "SECRET1".to_string(),
                ..Default::default()
            }),
        });

        let mut config = Config::default();
        config.system.data_dir = tmp.path().join("data").display().to_string();
        config.networks.push(net);
        Self { tmp, config }
    }

    pub fn net_mut(&mut self) -> &mut NetworkConfig {
        &mut self.config.networks[0]
    }

    pub fn net(&self) -> &NetworkConfig {
        &self.config.networks[0]
    }

    pub fn dir(&self) -> PathBuf {
        self.net().dir_path()
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(&self.config, None, Box::new(ArchiverTable::new(Vec::new())))
            .expect("pipeline")
            .with_fixed_time(fixed_now())
    }

    /// Write a packet from the hub to us into the inbound directory.
    pub fn drop_inbound_packet(&self, name: &str, password: &str, messages: &[PackedMessage]) -> PathBuf {
        let inbound = self.net().inbound_path();
        fs::create_dir_all(&inbound).unwrap();
        let path = inbound.join(name);
        write_packet(&path, &hub(), &us(), password, messages);
        path
    }

    /// Append one message to the BBS outbound queue.
    pub fn queue_outbound(&self, packet: &LocalPacket) {
        append_local_packet(&self.dir().join(outbound_file_name()), packet).unwrap();
    }

    pub fn write_subscribers(&self, area: &str, lines: &str) {
        fs::write(self.dir().join(format!("n{}.net", area)), lines).unwrap();
    }
}

pub fn us() -> FidoAddress {
    ftngate::ftn::parse_address(OUR_ADDRESS).unwrap()
}

pub fn hub() -> FidoAddress {
    ftngate::ftn::parse_address(HUB_ADDRESS).unwrap()
}

/// Tuesday 2024-03-05 14:30:15 local time.
pub fn fixed_now() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 3, 5, 14, 30, 15).unwrap()
}

pub fn write_packet(path: &Path, orig: &FidoAddress, dest: &FidoAddress, password: &str, messages: &[PackedMessage]) {
    let header = PacketHeader::type2_plus(orig, dest, &fixed_now(), password);
    let mut w = BufWriter::new(File::create(path).unwrap());
    write_packet_header(&mut w, &header).unwrap();
    for m in messages {
        write_packed_message(&mut w, m).unwrap();
    }
    write_packet_terminator(&mut w).unwrap();
}

/// An echomail post from the hub in `area`.
pub fn echo_post(area: &str, subject: &str, msgid: &str) -> PackedMessage {
    let from = hub();
    PackedMessage {
        header: PackedHeader {
            orig_net: from.net(),
            orig_node: from.node(),
            dest_net: 1,
            dest_node: 101,
            ..Default::default()
        },
        date_time: "05 Mar 24  12:00:00".to_string(),
        to_user_name: "All".to_string(),
        from_user_name: "Hub Sysop".to_string(),
        subject: subject.to_string(),
        text: format!(
            "AREA:{}\r\u{1}MSGID: {} {}\rHello from the hub\r * Origin: Hub (21:1/100)\r",
            area, HUB_ADDRESS, msgid
        ),
    }
}

/// A private netmail from the hub to `to`.
pub fn netmail(to: &str, subject: &str) -> PackedMessage {
    let from = hub();
    PackedMessage {
        header: PackedHeader {
            orig_net: from.net(),
            orig_node: from.node(),
            dest_net: 1,
            dest_node: 101,
            attribute: Attributes::PRIVATE,
            ..Default::default()
        },
        date_time: "05 Mar 24  12:00:00".to_string(),
        to_user_name: to.to_string(),
        from_user_name: "Hub Sysop".to_string(),
        subject: subject.to_string(),
        text: "\u{1}INTL 21:1/101 21:1/100\rPrivate hello\r".to_string(),
    }
}

/// A local echomail post waiting for export.
pub fn local_post(area: &str, title: &str, body: &str) -> LocalPacket {
    let nh = NetHeader {
        tosys: 32765,
        fromsys: 1,
        fromuser: 1,
        main_type: MAIN_TYPE_NEW_POST,
        daten: fixed_now().timestamp() as u32,
        ..Default::default()
    };
    let text = format!("{}\0{}\0SYSOP #1\r\nTue Mar 05 14:30:15 2024\r\n{}", area, title, body);
    LocalPacket::new(nh, Vec::new(), text)
}

/// A local email addressed to `to` (e.g. `joe @21:1/100`) waiting for export.
pub fn local_email(to: &str, title: &str, body: &str) -> LocalPacket {
    let nh = NetHeader {
        tosys: 32765,
        fromsys: 1,
        fromuser: 1,
        main_type: MAIN_TYPE_EMAIL_NAME,
        daten: fixed_now().timestamp() as u32,
        ..Default::default()
    };
    let text = format!("{}\0{}\0SYSOP #1\r\nTue Mar 05 14:30:15 2024\r\n{}", to, title, body);
    LocalPacket::new(nh, Vec::new(), text)
}

pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
