//! Binary codec for FTN packets and stored messages.
//!
//! Layouts are encoded field by field (little-endian) rather than by memory image so the
//! byte layout never depends on the host:
//!
//! ```text
//! packet file  = PacketHeader (58 bytes)
//!                { PackedMessage }
//!                0x00 0x00
//!
//! PackedMessage = sub-header (14 bytes)
//!                 date_time   20 bytes, NUL padded
//!                 to_user     ASCIIZ, max 36
//!                 from_user   ASCIIZ, max 36
//!                 subject     ASCIIZ, max 72
//!                 text        ASCIIZ, max 256 KiB
//!
//! StoredMessage = header (190 bytes) text ASCIIZ
//! ```
//!
//! Text is 8-bit on the wire. In memory every byte maps to the `char` with the same code
//! point (Latin-1), so decoding then encoding reproduces the original bytes.
//!
//! The codec does not validate field contents; that is left to the pipeline.

use std::io::{self, Read, Write};

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Datelike, Local, Timelike};
use log::warn;

use super::address::FidoAddress;

pub const PACKET_HEADER_SIZE: usize = 58;
pub const PACKED_HEADER_SIZE: usize = 14;
pub const STORED_HEADER_SIZE: usize = 190;
pub const DATE_TIME_LEN: usize = 20;
pub const MAX_NAME_LEN: usize = 36;
pub const MAX_SUBJECT_LEN: usize = 72;
pub const MAX_TEXT_LEN: usize = 256 * 1024;
pub const PACKET_PASSWORD_LEN: usize = 8;

/// Packet and packed-message version tag.
pub const PACKET_VERSION: u16 = 2;

/// FTSC product code for software without an assigned code.
const PRODUCT_CODE: u8 = 0xfe;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("short read in {what}: wanted {wanted} bytes, got {got}")]
    ShortRead {
        what: &'static str,
        wanted: usize,
        got: usize,
    },
}

bitflags! {
    /// FTS-0001 message attribute word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Attributes: u16 {
        const PRIVATE = 0x0001;
        const CRASH = 0x0002;
        const RECEIVED = 0x0004;
        const SENT = 0x0008;
        const FILE_ATTACHED = 0x0010;
        const IN_TRANSIT = 0x0020;
        const ORPHAN = 0x0040;
        const KILL_SENT = 0x0080;
        const LOCAL = 0x0100;
        const HOLD = 0x0200;
        /// Unused by FTS-0001; marks a message deleted inside this gateway.
        const DELETED = 0x0400;
        const FILE_REQUEST = 0x0800;
        const RETURN_RECEIPT_REQUEST = 0x1000;
        const IS_RETURN_RECEIPT = 0x2000;
        const AUDIT_REQUEST = 0x4000;
        const FILE_UPDATE_REQUEST = 0x8000;
    }
}

pub fn latin1_decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

pub fn latin1_encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Encode `text` into exactly `width` bytes, NUL padded, always leaving a trailing NUL.
fn put_fixed_str(buf: &mut BytesMut, text: &str, width: usize) {
    let mut bytes = latin1_encode(text);
    bytes.truncate(width.saturating_sub(1));
    let pad = width - bytes.len();
    buf.put_slice(&bytes);
    buf.put_bytes(0, pad);
}

/// Decode a fixed width field, trimming at the first NUL.
fn get_fixed_str(buf: &mut &[u8], width: usize) -> String {
    let field = &buf[..width];
    let end = field.iter().position(|&b| b == 0).unwrap_or(width);
    let s = latin1_decode(&field[..end]);
    buf.advance(width);
    s
}

/// Encode `text` NUL terminated, truncated so that text plus NUL fits within `cap`.
fn put_cstr(buf: &mut BytesMut, text: &str, cap: usize) {
    let mut bytes = latin1_encode(text);
    bytes.truncate(cap.saturating_sub(1));
    buf.put_slice(&bytes);
    buf.put_u8(0);
}

/// Read until `buf` is full or the reader is exhausted; returns bytes read.
fn read_fully<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match r.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

fn read_block<R: Read>(r: &mut R, buf: &mut [u8], what: &'static str) -> Result<(), CodecError> {
    let got = read_fully(r, buf)?;
    if got < buf.len() {
        return Err(CodecError::ShortRead { what, wanted: buf.len(), got });
    }
    Ok(())
}

/// Read a NUL terminated field, keeping at most `cap` bytes. Anything past the cap is
/// consumed up to the terminator so the next field starts in the right place.
fn read_cstr<R: Read>(r: &mut R, cap: usize) -> Result<String, CodecError> {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    let mut dropped = 0usize;
    loop {
        if read_fully(r, &mut byte)? == 0 || byte[0] == 0 {
            break;
        }
        if out.len() < cap {
            out.push(byte[0]);
        } else {
            dropped += 1;
        }
    }
    if dropped > 0 {
        warn!("Truncated over-long field to {} bytes ({} dropped)", cap, dropped);
    }
    Ok(latin1_decode(&out))
}

// ── Packet header ───────────────────────────────────────────────────────────

/// FSC-0039 type 2+ packet header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub orig_node: u16,
    pub dest_node: u16,
    pub year: u16,
    /// 0 based month.
    pub month: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub baud: u16,
    pub packet_ver: u16,
    pub orig_net: u16,
    pub dest_net: u16,
    pub product_code_low: u8,
    pub product_rev_major: u8,
    pub password: String,
    pub qm_orig_zone: u16,
    pub qm_dest_zone: u16,
    pub aux_net: u16,
    pub capabilities_valid: u16,
    pub product_code_high: u8,
    pub product_rev_minor: u8,
    pub capabilities: u16,
    pub orig_zone: u16,
    pub dest_zone: u16,
    pub orig_point: u16,
    pub dest_point: u16,
    pub product_data: u32,
}

impl PacketHeader {
    /// Build a type 2+ header from `orig` to `dest` stamped with `now`.
    pub fn type2_plus(
        orig: &FidoAddress,
        dest: &FidoAddress,
        now: &DateTime<Local>,
        password: &str,
    ) -> Self {
        let capabilities: u16 = 0x0001;
        Self {
            orig_node: orig.node(),
            dest_node: dest.node(),
            year: now.year() as u16,
            month: now.month0() as u16,
            day: now.day() as u16,
            hour: now.hour() as u16,
            minute: now.minute() as u16,
            second: now.second() as u16,
            baud: 33600,
            packet_ver: PACKET_VERSION,
            orig_net: orig.net(),
            dest_net: dest.net(),
            product_code_low: PRODUCT_CODE,
            product_rev_major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
            password: password.to_string(),
            qm_orig_zone: orig.zone(),
            qm_dest_zone: dest.zone(),
            aux_net: 0,
            capabilities_valid: capabilities.swap_bytes(),
            product_code_high: 0,
            product_rev_minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
            capabilities,
            orig_zone: orig.zone(),
            dest_zone: dest.zone(),
            orig_point: orig.point(),
            dest_point: dest.point(),
            product_data: 0,
        }
    }

    /// Origin address, falling back to the QMail zone when the 2+ zone is unset.
    pub fn orig_address(&self) -> FidoAddress {
        let zone = if self.orig_zone != 0 { self.orig_zone } else { self.qm_orig_zone };
        FidoAddress::new(zone, self.orig_net, self.orig_node, self.orig_point)
    }

    pub fn dest_address(&self) -> FidoAddress {
        let zone = if self.dest_zone != 0 { self.dest_zone } else { self.qm_dest_zone };
        FidoAddress::new(zone, self.dest_net, self.dest_node, self.dest_point)
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.orig_node);
        buf.put_u16_le(self.dest_node);
        buf.put_u16_le(self.year);
        buf.put_u16_le(self.month);
        buf.put_u16_le(self.day);
        buf.put_u16_le(self.hour);
        buf.put_u16_le(self.minute);
        buf.put_u16_le(self.second);
        buf.put_u16_le(self.baud);
        buf.put_u16_le(self.packet_ver);
        buf.put_u16_le(self.orig_net);
        buf.put_u16_le(self.dest_net);
        buf.put_u8(self.product_code_low);
        buf.put_u8(self.product_rev_major);
        // The password fills all 8 bytes; it is not NUL terminated on the wire.
        let mut pw = latin1_encode(&self.password);
        pw.resize(PACKET_PASSWORD_LEN, 0);
        buf.put_slice(&pw);
        buf.put_u16_le(self.qm_orig_zone);
        buf.put_u16_le(self.qm_dest_zone);
        buf.put_u16_le(self.aux_net);
        buf.put_u16_le(self.capabilities_valid);
        buf.put_u8(self.product_code_high);
        buf.put_u8(self.product_rev_minor);
        buf.put_u16_le(self.capabilities);
        buf.put_u16_le(self.orig_zone);
        buf.put_u16_le(self.dest_zone);
        buf.put_u16_le(self.orig_point);
        buf.put_u16_le(self.dest_point);
        buf.put_u32_le(self.product_data);
    }

    /// Decode from exactly [`PACKET_HEADER_SIZE`] bytes.
    pub fn decode(mut buf: &[u8]) -> Self {
        let b = &mut buf;
        Self {
            orig_node: b.get_u16_le(),
            dest_node: b.get_u16_le(),
            year: b.get_u16_le(),
            month: b.get_u16_le(),
            day: b.get_u16_le(),
            hour: b.get_u16_le(),
            minute: b.get_u16_le(),
            second: b.get_u16_le(),
            baud: b.get_u16_le(),
            packet_ver: b.get_u16_le(),
            orig_net: b.get_u16_le(),
            dest_net: b.get_u16_le(),
            product_code_low: b.get_u8(),
            product_rev_major: b.get_u8(),
            password: get_fixed_str(b, PACKET_PASSWORD_LEN),
            qm_orig_zone: b.get_u16_le(),
            qm_dest_zone: b.get_u16_le(),
            aux_net: b.get_u16_le(),
            capabilities_valid: b.get_u16_le(),
            product_code_high: b.get_u8(),
            product_rev_minor: b.get_u8(),
            capabilities: b.get_u16_le(),
            orig_zone: b.get_u16_le(),
            dest_zone: b.get_u16_le(),
            orig_point: b.get_u16_le(),
            dest_point: b.get_u16_le(),
            product_data: b.get_u32_le(),
        }
    }
}

pub fn read_packet_header<R: Read>(r: &mut R) -> Result<PacketHeader, CodecError> {
    let mut raw = [0u8; PACKET_HEADER_SIZE];
    read_block(r, &mut raw, "packet header")?;
    let header = PacketHeader::decode(&raw);
    if header.packet_ver != PACKET_VERSION {
        warn!("Unexpected packet version {} in packet header", header.packet_ver);
    }
    Ok(header)
}

pub fn write_packet_header<W: Write>(w: &mut W, header: &PacketHeader) -> Result<(), CodecError> {
    let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
    header.encode(&mut buf);
    w.write_all(&buf)?;
    Ok(())
}

/// Write the two NUL bytes that close a packet file.
pub fn write_packet_terminator<W: Write>(w: &mut W) -> Result<(), CodecError> {
    w.write_all(&[0, 0])?;
    Ok(())
}

// ── Packed message ──────────────────────────────────────────────────────────

/// Fixed 14-byte sub-header of a packed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedHeader {
    pub message_type: u16,
    pub orig_node: u16,
    pub dest_node: u16,
    pub orig_net: u16,
    pub dest_net: u16,
    pub attribute: Attributes,
    pub cost: u16,
}

impl Default for PackedHeader {
    fn default() -> Self {
        Self {
            message_type: PACKET_VERSION,
            orig_node: 0,
            dest_node: 0,
            orig_net: 0,
            dest_net: 0,
            attribute: Attributes::empty(),
            cost: 0,
        }
    }
}

/// One message inside a packet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackedMessage {
    pub header: PackedHeader,
    pub date_time: String,
    pub to_user_name: String,
    pub from_user_name: String,
    pub subject: String,
    pub text: String,
}

impl PackedMessage {
    pub fn is_private(&self) -> bool {
        self.header.attribute.contains(Attributes::PRIVATE)
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let h = &self.header;
        buf.put_u16_le(h.message_type);
        buf.put_u16_le(h.orig_node);
        buf.put_u16_le(h.dest_node);
        buf.put_u16_le(h.orig_net);
        buf.put_u16_le(h.dest_net);
        buf.put_u16_le(h.attribute.bits());
        buf.put_u16_le(h.cost);
        put_fixed_str(buf, &self.date_time, DATE_TIME_LEN);
        put_cstr(buf, &self.to_user_name, MAX_NAME_LEN);
        put_cstr(buf, &self.from_user_name, MAX_NAME_LEN);
        put_cstr(buf, &self.subject, MAX_SUBJECT_LEN);
        put_cstr(buf, &self.text, MAX_TEXT_LEN);
    }
}

/// Read the next message of a packet. `Ok(None)` marks the end of the packet: either the
/// input ran out before a sub-header, or the 2-byte end marker was found.
pub fn read_packed_message<R: Read>(r: &mut R) -> Result<Option<PackedMessage>, CodecError> {
    let mut tag = [0u8; 2];
    if read_fully(r, &mut tag)? < tag.len() {
        return Ok(None);
    }
    let message_type = u16::from_le_bytes(tag);
    if message_type == 0 {
        return Ok(None);
    }
    if message_type != PACKET_VERSION {
        warn!("Unexpected packed message type {}; reading on by position", message_type);
    }

    let mut rest = [0u8; PACKED_HEADER_SIZE - 2];
    read_block(r, &mut rest, "packed message header")?;
    let mut b = &rest[..];
    let header = PackedHeader {
        message_type,
        orig_node: b.get_u16_le(),
        dest_node: b.get_u16_le(),
        orig_net: b.get_u16_le(),
        dest_net: b.get_u16_le(),
        attribute: Attributes::from_bits_retain(b.get_u16_le()),
        cost: b.get_u16_le(),
    };

    let mut date = [0u8; DATE_TIME_LEN];
    read_block(r, &mut date, "packed message date")?;
    let date_time = get_fixed_str(&mut &date[..], DATE_TIME_LEN);

    Ok(Some(PackedMessage {
        header,
        date_time,
        to_user_name: read_cstr(r, MAX_NAME_LEN)?,
        from_user_name: read_cstr(r, MAX_NAME_LEN)?,
        subject: read_cstr(r, MAX_SUBJECT_LEN)?,
        text: read_cstr(r, MAX_TEXT_LEN)?,
    }))
}

pub fn write_packed_message<W: Write>(w: &mut W, msg: &PackedMessage) -> Result<(), CodecError> {
    let mut buf = BytesMut::with_capacity(PACKED_HEADER_SIZE + DATE_TIME_LEN + msg.text.len() + 160);
    msg.encode(&mut buf);
    w.write_all(&buf)?;
    Ok(())
}

// ── Stored message ──────────────────────────────────────────────────────────

/// Header of a FTS-0001 stored message (`*.msg`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredHeader {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date_time: String,
    pub times_read: u16,
    pub dest_node: u16,
    pub orig_node: u16,
    pub cost: u16,
    pub orig_net: u16,
    pub dest_net: u16,
    pub dest_zone: u16,
    pub orig_zone: u16,
    pub dest_point: u16,
    pub orig_point: u16,
    pub reply_to: u16,
    pub attribute: Attributes,
    pub next_reply: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoredMessage {
    pub header: StoredHeader,
    pub text: String,
}

impl StoredMessage {
    pub fn encode(&self, buf: &mut BytesMut) {
        let h = &self.header;
        put_fixed_str(buf, &h.from, MAX_NAME_LEN);
        put_fixed_str(buf, &h.to, MAX_NAME_LEN);
        put_fixed_str(buf, &h.subject, MAX_SUBJECT_LEN);
        put_fixed_str(buf, &h.date_time, DATE_TIME_LEN);
        buf.put_u16_le(h.times_read);
        buf.put_u16_le(h.dest_node);
        buf.put_u16_le(h.orig_node);
        buf.put_u16_le(h.cost);
        buf.put_u16_le(h.orig_net);
        buf.put_u16_le(h.dest_net);
        buf.put_u16_le(h.dest_zone);
        buf.put_u16_le(h.orig_zone);
        buf.put_u16_le(h.dest_point);
        buf.put_u16_le(h.orig_point);
        buf.put_u16_le(h.reply_to);
        buf.put_u16_le(h.attribute.bits());
        buf.put_u16_le(h.next_reply);
        buf.put_slice(&latin1_encode(&self.text));
        buf.put_u8(0);
    }

    fn decode_header(mut buf: &[u8]) -> StoredHeader {
        let b = &mut buf;
        StoredHeader {
            from: get_fixed_str(b, MAX_NAME_LEN),
            to: get_fixed_str(b, MAX_NAME_LEN),
            subject: get_fixed_str(b, MAX_SUBJECT_LEN),
            date_time: get_fixed_str(b, DATE_TIME_LEN),
            times_read: b.get_u16_le(),
            dest_node: b.get_u16_le(),
            orig_node: b.get_u16_le(),
            cost: b.get_u16_le(),
            orig_net: b.get_u16_le(),
            dest_net: b.get_u16_le(),
            dest_zone: b.get_u16_le(),
            orig_zone: b.get_u16_le(),
            dest_point: b.get_u16_le(),
            orig_point: b.get_u16_le(),
            reply_to: b.get_u16_le(),
            attribute: Attributes::from_bits_retain(b.get_u16_le()),
            next_reply: b.get_u16_le(),
        }
    }
}

pub fn read_stored_message<R: Read>(r: &mut R) -> Result<StoredMessage, CodecError> {
    let mut raw = [0u8; STORED_HEADER_SIZE];
    read_block(r, &mut raw, "stored message header")?;
    let header = StoredMessage::decode_header(&raw);
    let mut body = Vec::new();
    r.take(MAX_TEXT_LEN as u64).read_to_end(&mut body)?;
    if let Some(end) = body.iter().position(|&b| b == 0) {
        body.truncate(end);
    }
    Ok(StoredMessage { header, text: latin1_decode(&body) })
}

pub fn write_stored_message<W: Write>(w: &mut W, msg: &StoredMessage) -> Result<(), CodecError> {
    let mut buf = BytesMut::with_capacity(STORED_HEADER_SIZE + msg.text.len() + 1);
    msg.encode(&mut buf);
    w.write_all(&buf)?;
    Ok(())
}
