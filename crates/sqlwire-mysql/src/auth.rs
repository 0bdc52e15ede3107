//! Server greeting and `mysql_native_password` authentication.
//!
//! Password scramble algorithm:
//! ```text
//! SHA1(password) XOR SHA1(scramble + SHA1(SHA1(password)))
//! ```

use crate::config::MySqlConfig;
use crate::protocol::{PacketReader, PacketWriter, charset};
use sha1::{Digest, Sha1};
use sqlwire_core::{Error, Result};

/// The only authentication plugin this driver speaks.
pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";

/// Max packet size announced in the handshake response.
const CLIENT_MAX_PACKET: u32 = 0xFF_FF_FF;

/// Parsed server greeting (protocol version 10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// 8 bytes, or 20 when the extended block is present
    pub scramble: Vec<u8>,
    pub capabilities_lower: u16,
    /// Present only with the extended block
    pub capabilities_upper: Option<u16>,
    pub charset: Option<u8>,
    pub status_flags: Option<u16>,
}

impl Handshake {
    /// Full 32-bit server capability mask (upper half zero when not sent).
    pub fn capabilities(&self) -> u32 {
        u32::from(self.capabilities_lower)
            | (u32::from(self.capabilities_upper.unwrap_or(0)) << 16)
    }
}

/// Parse the initial greeting payload.
///
/// Layout: protocol version, NUL-terminated server version, connection id,
/// 8 scramble bytes, filler, lower capabilities; then optionally charset,
/// status, upper capabilities, auth data length, 10 reserved bytes and 12
/// more scramble bytes.
#[allow(clippy::result_large_err)]
pub fn parse_handshake(payload: &[u8]) -> Result<Handshake> {
    if payload.first() == Some(&0xFF) {
        let err = PacketReader::new(payload).parse_err_packet()?;
        return Err(Error::Server(err));
    }

    let mut reader = PacketReader::new(payload);
    let protocol_version = reader.read_u8()?;
    let server_version = reader.read_null_string()?;
    let connection_id = reader.read_u32_le()?;
    let mut scramble = reader.read_bytes(8)?.to_vec();
    reader.skip(1)?;
    let capabilities_lower = reader.read_u16_le()?;

    let mut handshake = Handshake {
        protocol_version,
        server_version,
        connection_id,
        scramble: Vec::new(),
        capabilities_lower,
        capabilities_upper: None,
        charset: None,
        status_flags: None,
    };

    if !reader.is_empty() {
        handshake.charset = Some(reader.read_u8()?);
        handshake.status_flags = Some(reader.read_u16_le()?);
        handshake.capabilities_upper = Some(reader.read_u16_le()?);
        // auth data length, 10 reserved bytes
        reader.skip(11)?;
        scramble.extend_from_slice(reader.read_bytes(12)?);
    }
    handshake.scramble = scramble;

    tracing::debug!(
        target: "sqlwire::mysql",
        server_version = %handshake.server_version,
        connection_id = handshake.connection_id,
        "server greeting"
    );
    Ok(handshake)
}

/// Compute the mysql_native_password cryptogram.
///
/// Returns an empty vec for an empty password. Only the first 20 bytes of
/// `scramble` are used.
pub fn mysql_native_password(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let seed = &scramble[..scramble.len().min(20)];

    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2: [u8; 20] = Sha1::digest(stage1).into();

    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3: [u8; 20] = hasher.finalize().into();

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Build the handshake response payload (sent at sequence 1).
///
/// Fails with `WrongHandshake` when a password is configured but the
/// greeting carried no scramble.
#[allow(clippy::result_large_err)]
pub fn build_auth_response(config: &MySqlConfig, handshake: &Handshake) -> Result<Vec<u8>> {
    let password = config.password.as_deref().unwrap_or("");
    if !password.is_empty() && handshake.scramble.is_empty() {
        return Err(Error::WrongHandshake);
    }
    let token = mysql_native_password(password, &handshake.scramble);
    let token_len = u8::try_from(token.len())
        .map_err(|_| Error::data_reading("auth token longer than 255 bytes"))?;

    let mut writer = PacketWriter::new();
    writer.write_u32_le(config.capability_flags(handshake.capabilities_lower));
    writer.write_u32_le(CLIENT_MAX_PACKET);
    writer.write_u8(charset::DEFAULT_CHARSET);
    writer.write_zeros(23);
    writer.write_null_string(&config.user);
    writer.write_u8(token_len);
    writer.write_bytes(&token);
    writer.write_null_string(config.database.as_deref().unwrap_or(""));
    writer.write_null_string(MYSQL_NATIVE_PASSWORD);
    Ok(writer.into_bytes())
}
