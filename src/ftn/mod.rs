//! FTN protocol primitives: addresses, routing masks, wire codec, dates and file naming.

pub mod address;
pub mod codec;
pub mod datetime;
pub mod naming;
pub mod routing;

pub use address::{parse_address, AddressError, FidoAddress};
pub use codec::{
    read_packed_message, read_packet_header, read_stored_message, write_packed_message,
    write_packet_header, write_packet_terminator, write_stored_message, Attributes, CodecError,
    PackedHeader, PackedMessage, PacketHeader, StoredHeader, StoredMessage,
};
pub use naming::{BundleStatus, NamingError};
pub use routing::{find_route, matches_mask, RouteEntry};
