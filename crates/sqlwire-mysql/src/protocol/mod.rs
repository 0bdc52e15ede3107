//! MySQL wire protocol primitives.
//!
//! Every packet starts with a 4-byte header:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence number
//!
//! Payloads of 2^24 - 1 bytes or more would need continuation packets,
//! which this driver does not produce or reassemble.

pub mod reader;
pub mod writer;

pub use reader::PacketReader;
pub use writer::{PacketWriter, build_command_packet, build_packet};

/// Maximum payload size for a single MySQL packet (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// Capability flags exchanged during the handshake.
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_LOCAL_FILES: u32 = 1 << 7;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;

    /// Flags this client asks for, before intersecting with the server's.
    pub const DESIRED_CLIENT_FLAGS: u32 = CLIENT_PROTOCOL_41
        | CLIENT_LONG_PASSWORD
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_LOCAL_FILES
        | CLIENT_MULTI_STATEMENTS
        | CLIENT_MULTI_RESULTS;
}

/// Command codes (COM_xxx).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Close the session
    Quit = 0x01,
    /// Text protocol query
    Query = 0x03,
    /// Liveness check
    Ping = 0x0e,
}

/// Server status flags carried by OK and EOF packets.
pub mod server_status {
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
}

/// Character set codes.
pub mod charset {
    pub const UTF8_GENERAL_CI: u8 = 33;

    /// Charset announced in the handshake response.
    pub const DEFAULT_CHARSET: u8 = UTF8_GENERAL_CI;
}

/// A packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max 16MB - 1)
    pub payload_length: u32,
    /// Sequence number (wraps at 255)
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Total header size in bytes.
    pub const SIZE: usize = 4;

    /// Parse a packet header from 4 bytes.
    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        let payload_length =
            u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16);
        Self {
            payload_length,
            sequence_id: bytes[3],
        }
    }

    /// Encode the header to 4 bytes.
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_bytes(&self) -> [u8; 4] {
        [
            (self.payload_length & 0xFF) as u8,
            ((self.payload_length >> 8) & 0xFF) as u8,
            ((self.payload_length >> 16) & 0xFF) as u8,
            self.sequence_id,
        ]
    }
}

/// An OK packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    /// Zero when the packet stops after the insert id
    pub status_flags: u16,
    pub warnings: u16,
}

impl OkPacket {
    pub fn more_results(&self) -> bool {
        self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0
    }
}

/// An EOF packet terminating a column or row sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl EofPacket {
    /// Another result set follows this one.
    pub fn more_results(&self) -> bool {
        self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0
    }
}

/// Does this payload have the EOF shape (`0xFE` lead, 1 or 5 bytes long)?
///
/// A row whose first cell happens to be 0xFE-prefixed is longer than that,
/// which is what keeps the two apart.
pub fn is_eof_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&0xFE) && (payload.len() == 1 || payload.len() == 5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn header_at_max_size() {
        let header = PacketHeader {
            payload_length: MAX_PACKET_SIZE as u32,
            sequence_id: 255,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes, [0xFF, 0xFF, 0xFF, 255]);
        assert_eq!(PacketHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn eof_shape() {
        assert!(is_eof_packet(&[0xFE]));
        assert!(is_eof_packet(&[0xFE, 0, 0, 0x08, 0]));
        assert!(!is_eof_packet(&[0xFE, 0, 0]));
        assert!(!is_eof_packet(&[0xFE, 1, 2, 3, 4, 5, 6, 7, 8]));
        assert!(!is_eof_packet(&[0x00]));
        assert!(!is_eof_packet(&[]));
    }

    #[test]
    fn more_results_flag() {
        let eof = EofPacket {
            warnings: 0,
            status_flags: server_status::SERVER_MORE_RESULTS_EXISTS
                | server_status::SERVER_STATUS_AUTOCOMMIT,
        };
        assert!(eof.more_results());
        assert!(!EofPacket::default().more_results());
    }

    #[test]
    fn desired_flags_exclude_connect_with_db() {
        assert_eq!(
            capabilities::DESIRED_CLIENT_FLAGS & capabilities::CLIENT_CONNECT_WITH_DB,
            0
        );
        assert_eq!(capabilities::DESIRED_CLIENT_FLAGS, 0x0003_A281);
    }
}
