//! The local system's internal packet format.
//!
//! A local packet file is a plain concatenation of messages, each a 24-byte header, an
//! optional list of 16-bit system numbers, and `length` bytes of text. Import appends to
//! `LOCAL.NET`, export reads `s32765.net`, and anything that cannot be delivered lands in
//! `DEAD.NET` in the same format.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};
use log::{debug, warn};

use crate::ftn::codec::{latin1_decode, latin1_encode, CodecError};

pub const NET_HEADER_SIZE: usize = 24;

pub const MAIN_TYPE_EMAIL: u16 = 2;
pub const MAIN_TYPE_EMAIL_NAME: u16 = 7;
pub const MAIN_TYPE_NEW_POST: u16 = 26;
/// Written over `main_type` to mark an entry deleted in place.
pub const MAIN_TYPE_DELETED: u16 = 65535;

/// Reserved system number that marks a message as bound for the FTN network.
pub const FAKE_OUTBOUND_NODE: u16 = 32765;

pub const LOCAL_NET: &str = "LOCAL.NET";
pub const DEAD_NET: &str = "DEAD.NET";

/// `s32765.net`: messages queued for FTN export.
pub fn outbound_file_name() -> String {
    format!("s{}.net", FAKE_OUTBOUND_NODE)
}

/// `n<subtype>.net`: subscriber list for an echo area.
pub fn subscriber_file_name(subtype: &str) -> String {
    format!("n{}.net", subtype)
}

pub fn main_type_name(main_type: u16) -> &'static str {
    match main_type {
        MAIN_TYPE_EMAIL => "email",
        MAIN_TYPE_EMAIL_NAME => "email_name",
        MAIN_TYPE_NEW_POST => "new_post",
        MAIN_TYPE_DELETED => "deleted",
        _ => "unknown",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetHeader {
    pub tosys: u16,
    pub touser: u16,
    pub fromsys: u16,
    pub fromuser: u16,
    pub main_type: u16,
    pub minor_type: u16,
    pub list_len: u16,
    pub daten: u32,
    pub length: u32,
    pub method: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalPacket {
    pub header: NetHeader,
    pub list: Vec<u16>,
    pub text: String,
}

impl LocalPacket {
    /// Build a packet, filling `list_len` and `length` from `list` and `text`.
    pub fn new(mut header: NetHeader, list: Vec<u16>, text: String) -> Self {
        header.list_len = list.len() as u16;
        header.length = latin1_encode(&text).len() as u32;
        Self { header, list, text }
    }

    pub fn is_email(&self) -> bool {
        matches!(self.header.main_type, MAIN_TYPE_EMAIL | MAIN_TYPE_EMAIL_NAME)
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let text = latin1_encode(&self.text);
        let h = &self.header;
        buf.put_u16_le(h.tosys);
        buf.put_u16_le(h.touser);
        buf.put_u16_le(h.fromsys);
        buf.put_u16_le(h.fromuser);
        buf.put_u16_le(h.main_type);
        buf.put_u16_le(h.minor_type);
        buf.put_u16_le(self.list.len() as u16);
        buf.put_u32_le(h.daten);
        buf.put_u32_le(text.len() as u32);
        buf.put_u16_le(h.method);
        for sys in &self.list {
            buf.put_u16_le(*sys);
        }
        buf.put_slice(&text);
    }

    fn decode_header(mut buf: &[u8]) -> NetHeader {
        let b = &mut buf;
        NetHeader {
            tosys: b.get_u16_le(),
            touser: b.get_u16_le(),
            fromsys: b.get_u16_le(),
            fromuser: b.get_u16_le(),
            main_type: b.get_u16_le(),
            minor_type: b.get_u16_le(),
            list_len: b.get_u16_le(),
            daten: b.get_u32_le(),
            length: b.get_u32_le(),
            method: b.get_u16_le(),
        }
    }
}

fn read_exact_or<R: Read>(r: &mut R, buf: &mut [u8], what: &'static str) -> Result<usize, CodecError> {
    let mut got = 0;
    while got < buf.len() {
        match r.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if got != 0 && got < buf.len() {
        return Err(CodecError::ShortRead { what, wanted: buf.len(), got });
    }
    Ok(got)
}

/// Read the next live message. Deleted entries are skipped; `Ok(None)` is end of file.
pub fn read_local_packet<R: Read>(r: &mut R) -> Result<Option<LocalPacket>, CodecError> {
    loop {
        let mut raw = [0u8; NET_HEADER_SIZE];
        if read_exact_or(r, &mut raw, "local packet header")? == 0 {
            return Ok(None);
        }
        let header = LocalPacket::decode_header(&raw);

        let mut list_raw = vec![0u8; usize::from(header.list_len) * 2];
        if !list_raw.is_empty() {
            let got = read_exact_or(r, &mut list_raw, "local packet list")?;
            if got == 0 {
                return Err(CodecError::ShortRead { what: "local packet list", wanted: list_raw.len(), got });
            }
        }
        let list = list_raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();

        // The length comes from the file, so only allocate what is actually there.
        let wanted = header.length as usize;
        let mut text = Vec::new();
        let got = (&mut *r).take(u64::from(header.length)).read_to_end(&mut text)?;
        if got < wanted {
            return Err(CodecError::ShortRead { what: "local packet text", wanted, got });
        }

        if header.main_type == MAIN_TYPE_DELETED {
            debug!("Skipping deleted local packet entry");
            continue;
        }
        return Ok(Some(LocalPacket { header, list, text: latin1_decode(&text) }));
    }
}

pub fn write_local_packet<W: Write>(w: &mut W, packet: &LocalPacket) -> Result<(), CodecError> {
    let mut buf = BytesMut::with_capacity(NET_HEADER_SIZE + packet.list.len() * 2 + packet.text.len());
    packet.encode(&mut buf);
    w.write_all(&buf)?;
    Ok(())
}

/// Append one message to the packet file at `path`, creating it if needed.
pub fn append_local_packet(path: &Path, packet: &LocalPacket) -> Result<(), CodecError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    write_local_packet(&mut file, packet)?;
    file.flush()?;
    Ok(())
}

/// Read every live message from the packet file at `path`.
pub fn read_local_packet_file(path: &Path) -> Result<Vec<LocalPacket>, CodecError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    while let Some(p) = read_local_packet(&mut reader)? {
        out.push(p);
    }
    Ok(out)
}

/// Cursor over the NUL / line separated fields at the start of a local message text.
#[derive(Debug, Clone)]
pub struct FieldReader<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    /// Read up to the first of `stops` (or `max` chars, or the end). The stop character is
    /// consumed, along with the `\n` of a `\r\n` pair.
    pub fn next_field(&mut self, stops: &[char], max: usize) -> String {
        let rest = &self.text[self.pos..];
        let mut end = rest.len();
        let mut stop = None;
        for (count, (idx, ch)) in rest.char_indices().enumerate() {
            if stops.contains(&ch) {
                end = idx;
                stop = Some(ch);
                break;
            }
            if count >= max {
                end = idx;
                break;
            }
        }
        let field = rest[..end].to_string();
        self.pos += end;
        if let Some(ch) = stop {
            self.pos += ch.len_utf8();
            if ch == '\r' && self.text[self.pos..].starts_with('\n') {
                self.pos += 1;
            }
        }
        field
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.text[self.pos..].starts_with(prefix)
    }

    pub fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }
}

/// Separators between the leading fields of a local message.
pub const FIELD_STOPS: &[char] = &['\0', '\r', '\n'];
pub const MAX_FIELD_LEN: usize = 80;

/// Read an `n<subtype>.net` file of subscriber addresses.
pub fn read_subscribers(path: &Path) -> std::io::Result<Vec<crate::ftn::FidoAddress>> {
    let text = match std::fs::read(path) {
        Ok(raw) => latin1_decode(&raw),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut subscribers = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        match crate::ftn::parse_address(line) {
            Ok(a) if !subscribers.contains(&a) => subscribers.push(a),
            Ok(_) => {}
            Err(e) => warn!("Skipping subscriber line '{}' in {}: {}", line, path.display(), e),
        }
    }
    Ok(subscribers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn post(text: &str) -> LocalPacket {
        LocalPacket::new(
            NetHeader {
                tosys: FAKE_OUTBOUND_NODE,
                fromsys: 1,
                main_type: MAIN_TYPE_NEW_POST,
                daten: 1_451_890_929,
                ..Default::default()
            },
            vec![],
            text.to_string(),
        )
    }

    #[test]
    fn reads_back_multiple_messages_and_skips_deleted() {
        let mut deleted = post("gone");
        deleted.header.main_type = MAIN_TYPE_DELETED;
        let with_list = LocalPacket::new(NetHeader::default(), vec![1, 2, 3], "x".into());

        let mut bytes = Vec::new();
        write_local_packet(&mut bytes, &post("GENERAL\0Hi\0Bob #1\r\nnow\r\nbody")).unwrap();
        write_local_packet(&mut bytes, &deleted).unwrap();
        write_local_packet(&mut bytes, &with_list).unwrap();

        let mut cur = Cursor::new(bytes);
        let a = read_local_packet(&mut cur).unwrap().unwrap();
        assert_eq!(a.header.length as usize, a.text.len());
        assert_eq!(a.text, "GENERAL\0Hi\0Bob #1\r\nnow\r\nbody");
        let b = read_local_packet(&mut cur).unwrap().unwrap();
        assert_eq!(b.list, vec![1, 2, 3]);
        assert_eq!(b.header.list_len, 3);
        assert!(read_local_packet(&mut cur).unwrap().is_none());
    }

    #[test]
    fn truncated_message_is_an_error() {
        let mut bytes = Vec::new();
        write_local_packet(&mut bytes, &post("some text")).unwrap();
        bytes.truncate(NET_HEADER_SIZE - 3);
        assert!(read_local_packet(&mut Cursor::new(bytes)).is_err());
    }

    #[test]
    fn oversized_length_field_is_a_short_read() {
        let mut bytes = Vec::new();
        write_local_packet(&mut bytes, &post("short")).unwrap();
        bytes[18..22].copy_from_slice(&u32::MAX.to_le_bytes());
        match read_local_packet(&mut Cursor::new(bytes)) {
            Err(CodecError::ShortRead { got, .. }) => assert_eq!(got, 5),
            other => panic!("expected a short read, got {:?}", other),
        }
    }

    #[test]
    fn field_reader_splits_leading_fields() {
        let text = "1:2/3 JOHN\0Subject\0Bob #1 @2\r\nMon Jan 04 07:02:09 2016\r\nBody\r\n";
        let mut r = FieldReader::new(text);
        assert_eq!(r.next_field(FIELD_STOPS, MAX_FIELD_LEN), "1:2/3 JOHN");
        assert_eq!(r.next_field(FIELD_STOPS, MAX_FIELD_LEN), "Subject");
        assert_eq!(r.next_field(FIELD_STOPS, MAX_FIELD_LEN), "Bob #1 @2");
        assert_eq!(r.next_field(FIELD_STOPS, MAX_FIELD_LEN), "Mon Jan 04 07:02:09 2016");
        assert_eq!(r.rest(), "Body\r\n");
    }

    #[test]
    fn field_reader_keeps_empty_fields() {
        let mut r = FieldReader::new("\0Subject\0");
        assert_eq!(r.next_field(FIELD_STOPS, MAX_FIELD_LEN), "");
        assert_eq!(r.next_field(FIELD_STOPS, MAX_FIELD_LEN), "Subject");
        assert_eq!(r.next_field(FIELD_STOPS, MAX_FIELD_LEN), "");
    }

    #[test]
    fn reads_subscriber_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(subscriber_file_name("GENERAL"));
        std::fs::write(&path, "; comment\n1:2/3\n\nnot-an-address\n1:2/3\n21:1/100.1\n").unwrap();
        let subs = read_subscribers(&path).unwrap();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[1].to_string(), "21:1/100.1");
        assert!(read_subscribers(&dir.path().join("nmissing.net")).unwrap().is_empty());
    }
}
