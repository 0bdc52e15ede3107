//! Cursor over a packet payload.
//!
//! Every read is bounds checked; running off the end is a
//! `DataReading` error, never a panic.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::{EofPacket, OkPacket};
use sqlwire_core::error::{ProtocolError, ServerError};
use sqlwire_core::{Error, Result};

/// A reader for MySQL protocol data.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current cursor offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Peek at the next byte without advancing.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn truncated(&self, wanted: usize) -> Error {
        Error::DataReading(ProtocolError {
            message: format!(
                "packet truncated: wanted {} bytes at offset {}, {} left",
                wanted,
                self.pos,
                self.remaining()
            ),
            raw_data: Some(self.data.to_vec()),
        })
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(self.truncated(len));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    /// Read a u24 (little-endian, 3 bytes).
    pub fn read_u24_le(&mut self) -> Result<u32> {
        let [a, b, c] = self.read_array()?;
        Ok(u32::from_le_bytes([a, b, c, 0]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Read a length-encoded integer; `None` is the NULL marker.
    ///
    /// - 0x00-0xFA: the value itself
    /// - 0xFB: NULL
    /// - 0xFC: 2-byte value follows
    /// - 0xFD: 3-byte value follows
    /// - 0xFE: 8-byte value follows
    /// - 0xFF: not a valid lead byte
    pub fn read_lenenc_int(&mut self) -> Result<Option<u64>> {
        let first = self.read_u8()?;
        match first {
            0x00..=0xFA => Ok(Some(u64::from(first))),
            0xFB => Ok(None),
            0xFC => self.read_u16_le().map(|v| Some(u64::from(v))),
            0xFD => self.read_u24_le().map(|v| Some(u64::from(v))),
            0xFE => self.read_u64_le().map(Some),
            0xFF => Err(Error::data_reading(format!(
                "invalid length-encoded integer lead byte 0xFF at offset {}",
                self.pos - 1
            ))),
        }
    }

    /// Read a length-encoded integer that must not be NULL.
    pub fn read_lenenc_int_required(&mut self, what: &str) -> Result<u64> {
        self.read_lenenc_int()?
            .ok_or_else(|| Error::data_reading(format!("unexpected NULL for {what}")))
    }

    /// Read length-encoded bytes; `None` is SQL NULL, a zero length is empty.
    pub fn read_lenenc_bytes(&mut self) -> Result<Option<&'a [u8]>> {
        match self.read_lenenc_int()? {
            None => Ok(None),
            Some(len) => {
                let len = usize::try_from(len).map_err(|_| self.truncated(usize::MAX))?;
                self.read_bytes(len).map(Some)
            }
        }
    }

    /// Read a length-encoded string; `None` is SQL NULL, a zero length is `""`.
    pub fn read_lenenc_string(&mut self) -> Result<Option<String>> {
        Ok(self
            .read_lenenc_bytes()?
            .map(|b| String::from_utf8_lossy(b).into_owned()))
    }

    /// Read a NUL-terminated string. A missing terminator is an error.
    pub fn read_null_string(&mut self) -> Result<String> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let Some(end) = rest.iter().position(|&b| b == 0) else {
            return Err(Error::data_reading(format!(
                "unterminated string at offset {}",
                self.pos
            )));
        };
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(s)
    }

    /// Read a fixed-length string.
    pub fn read_string(&mut self, len: usize) -> Result<String> {
        Ok(String::from_utf8_lossy(self.read_bytes(len)?).into_owned())
    }

    /// Read the remaining data as a string.
    pub fn read_rest_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_rest()).into_owned()
    }

    /// Read the remaining bytes.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos.min(self.data.len())..];
        self.pos = self.data.len();
        rest
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// Parse an OK packet starting at the `0x00` marker.
    ///
    /// Status flags and warnings are optional; when the packet stops after
    /// the insert id they read as zero.
    pub fn parse_ok_packet(&mut self) -> Result<OkPacket> {
        if self.peek() == Some(0x00) {
            self.skip(1)?;
        }
        let affected_rows = self.read_lenenc_int_required("affected rows")?;
        let last_insert_id = self.read_lenenc_int()?.unwrap_or(0);
        let (status_flags, warnings) = if self.remaining() >= 4 {
            (self.read_u16_le()?, self.read_u16_le()?)
        } else {
            (0, 0)
        };
        Ok(OkPacket {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
        })
    }

    /// Parse an ERR packet starting at the `0xFF` marker.
    ///
    /// - error code: 2 bytes
    /// - optional `#` followed by a 5-character SQL state
    /// - message: rest of packet
    pub fn parse_err_packet(&mut self) -> Result<ServerError> {
        if self.peek() == Some(0xFF) {
            self.skip(1)?;
        }
        let code = self.read_u16_le()?;
        let sql_state = if self.peek() == Some(b'#') {
            self.skip(1)?;
            let state = self.read_bytes(self.remaining().min(5))?;
            String::from_utf8_lossy(state).into_owned()
        } else {
            String::new()
        };
        Ok(ServerError {
            code,
            sql_state,
            message: self.read_rest_string(),
            sql: None,
        })
    }

    /// Parse an EOF packet starting at the `0xFE` marker.
    ///
    /// The 1-byte form carries no warnings or status.
    pub fn parse_eof_packet(&mut self) -> Result<EofPacket> {
        if self.peek() == Some(0xFE) {
            self.skip(1)?;
        }
        if self.is_empty() {
            return Ok(EofPacket::default());
        }
        let warnings = self.read_u16_le()?;
        let status_flags = self.read_u16_le()?;
        Ok(EofPacket {
            warnings,
            status_flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lenenc(data: &[u8]) -> (Result<Option<u64>>, usize) {
        let mut reader = PacketReader::new(data);
        let v = reader.read_lenenc_int();
        (v, reader.position())
    }

    #[test]
    fn fixed_width_integers() {
        let mut reader = PacketReader::new(&[0x42, 0x34, 0x12, 0x56, 0x34, 0x12]);
        assert_eq!(reader.read_u8().unwrap(), 0x42);
        assert_eq!(reader.read_u16_le().unwrap(), 0x1234);
        assert_eq!(reader.read_u24_le().unwrap(), 0x0012_3456);
        assert!(reader.read_u8().is_err());

        let mut reader = PacketReader::new(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(reader.read_u64_le().unwrap(), 0x0807_0605_0403_0201);
    }

    #[test]
    fn lenenc_int_classes_and_widths() {
        let (v, used) = lenenc(&[0x00]);
        assert_eq!((v.unwrap(), used), (Some(0), 1));

        let (v, used) = lenenc(&[0xFA]);
        assert_eq!((v.unwrap(), used), (Some(250), 1));

        let (v, used) = lenenc(&[0xFB]);
        assert_eq!((v.unwrap(), used), (None, 1));

        let (v, used) = lenenc(&[0xFC, 0x34, 0x12]);
        assert_eq!((v.unwrap(), used), (Some(0x1234), 3));

        let (v, used) = lenenc(&[0xFD, 0x56, 0x34, 0x12]);
        assert_eq!((v.unwrap(), used), (Some(0x0012_3456), 4));

        let (v, used) = lenenc(&[0xFE, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!((v.unwrap(), used), (Some(0x0807_0605_0403_0201), 9));
    }

    #[test]
    fn lenenc_int_rejects_ff_and_truncation() {
        assert!(matches!(lenenc(&[0xFF]).0, Err(Error::DataReading(_))));
        assert!(matches!(lenenc(&[0xFC, 0x01]).0, Err(Error::DataReading(_))));
        assert!(matches!(lenenc(&[0xFE, 0, 0, 0]).0, Err(Error::DataReading(_))));
        assert!(matches!(lenenc(&[]).0, Err(Error::DataReading(_))));
    }

    #[test]
    fn lenenc_string_empty_is_not_null() {
        let mut reader = PacketReader::new(&[0x00, 0xFB, 0x03, b'a', b'b', b'c']);
        assert_eq!(reader.read_lenenc_string().unwrap(), Some(String::new()));
        assert_eq!(reader.read_lenenc_string().unwrap(), None);
        assert_eq!(reader.read_lenenc_string().unwrap(), Some("abc".to_string()));
        assert!(reader.is_empty());
    }

    #[test]
    fn lenenc_string_longer_than_buffer() {
        let mut reader = PacketReader::new(&[0x05, b'a', b'b']);
        assert!(matches!(
            reader.read_lenenc_string(),
            Err(Error::DataReading(_))
        ));
    }

    #[test]
    fn null_strings() {
        let mut reader = PacketReader::new(b"hello\0world\0");
        assert_eq!(reader.read_null_string().unwrap(), "hello");
        assert_eq!(reader.read_null_string().unwrap(), "world");
        assert!(PacketReader::new(b"nope").read_null_string().is_err());
    }

    #[test]
    fn ok_packet_full_and_short() {
        let data = [0x00, 0x01, 0x2A, 0x02, 0x00, 0x00, 0x00];
        let ok = PacketReader::new(&data).parse_ok_packet().unwrap();
        assert_eq!(ok.affected_rows, 1);
        assert_eq!(ok.last_insert_id, 42);
        assert_eq!(ok.status_flags, 2);
        assert_eq!(ok.warnings, 0);

        let ok = PacketReader::new(&[0x00, 0x03]).parse_ok_packet().unwrap();
        assert_eq!(ok.affected_rows, 3);
        assert_eq!(ok.last_insert_id, 0);
        assert_eq!(ok.status_flags, 0);
    }

    #[test]
    fn err_packet_with_and_without_state() {
        let mut data = vec![0xFF, 0x15, 0x04, b'#'];
        data.extend_from_slice(b"28000");
        data.extend_from_slice(b"Access denied");
        let err = PacketReader::new(&data).parse_err_packet().unwrap();
        assert_eq!(err.code, 1045);
        assert_eq!(err.sql_state, "28000");
        assert_eq!(err.message, "Access denied");

        let mut data = vec![0xFF, 0x28, 0x04];
        data.extend_from_slice(b"No database selected");
        let err = PacketReader::new(&data).parse_err_packet().unwrap();
        assert_eq!(err.code, 1064);
        assert!(err.sql_state.is_empty());
        assert_eq!(err.message, "No database selected");

        assert!(PacketReader::new(&[0xFF, 0x01]).parse_err_packet().is_err());
    }

    #[test]
    fn eof_packet_forms() {
        let eof = PacketReader::new(&[0xFE, 0x00, 0x00, 0x0A, 0x00])
            .parse_eof_packet()
            .unwrap();
        assert_eq!(eof.status_flags, 0x000A);
        assert!(eof.more_results());

        let eof = PacketReader::new(&[0xFE]).parse_eof_packet().unwrap();
        assert_eq!(eof, EofPacket::default());
    }
}
