//! Packet framing over a [`Socket`].

use crate::protocol::{Command, MAX_PACKET_SIZE, PacketHeader, build_command_packet, build_packet};
use crate::socket::Socket;
use sqlwire_core::Result;

/// One unframed packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Vec<u8>,
}

/// Frame `payload` at `sequence_id` and send it.
///
/// Oversized payloads fail with `PacketTooLarge` before any byte is sent.
#[allow(clippy::result_large_err)]
pub fn write_packet<S: Socket + ?Sized>(socket: &mut S, payload: &[u8], sequence_id: u8) -> Result<()> {
    let packet = build_packet(payload, sequence_id)?;
    tracing::trace!(
        target: "sqlwire::mysql",
        len = payload.len(),
        seq = sequence_id,
        "send packet"
    );
    socket.send(&packet)?;
    Ok(())
}

/// Send a command. Commands always open a new exchange at sequence 0.
#[allow(clippy::result_large_err)]
pub fn write_command<S: Socket + ?Sized>(socket: &mut S, command: Command, argument: &[u8]) -> Result<()> {
    let packet = build_command_packet(command as u8, argument, 0)?;
    tracing::trace!(
        target: "sqlwire::mysql",
        command = ?command,
        len = argument.len(),
        "send command"
    );
    socket.send(&packet)?;
    Ok(())
}

/// Read one packet: exactly 4 header bytes, then exactly the announced payload.
///
/// A payload of exactly `MAX_PACKET_SIZE` bytes would be followed by a
/// continuation packet; those are not reassembled.
#[allow(clippy::result_large_err)]
pub fn read_packet<S: Socket + ?Sized>(socket: &mut S) -> Result<Packet> {
    let header_bytes = socket.read_exact(PacketHeader::SIZE)?;
    let mut raw = [0u8; PacketHeader::SIZE];
    raw.copy_from_slice(&header_bytes);
    let header = PacketHeader::from_bytes(&raw);

    let len = header.payload_length as usize;
    if len == MAX_PACKET_SIZE {
        tracing::warn!(
            target: "sqlwire::mysql",
            len,
            "received a maximum-size packet; continuation packets are not reassembled"
        );
    }
    let payload = if len == 0 {
        Vec::new()
    } else {
        socket.read_exact(len)?
    };
    tracing::trace!(target: "sqlwire::mysql", len, seq = header.sequence_id, "recv packet");
    Ok(Packet {
        sequence_id: header.sequence_id,
        payload,
    })
}
