//! In-memory MySQL server replay for tests.
//!
//! Available with the `test-util` feature.

use sqlwire_core::error::{TransportError, TransportErrorKind};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::protocol::{PacketHeader, PacketWriter, build_packet};
use crate::socket::Socket;

/// One scripted server session: the bytes the server sends after a connect.
///
/// When the script runs dry mid-read the socket reports a read failure,
/// which is how tests simulate a dropped connection.
#[derive(Debug, Clone, Default)]
pub struct Session {
    incoming: VecDeque<u8>,
    refuse: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session whose connect attempt is refused.
    pub fn refused() -> Self {
        Self {
            incoming: VecDeque::new(),
            refuse: true,
        }
    }

    /// Append raw bytes to the server stream.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.incoming.extend(bytes);
        self
    }

    /// Append one framed packet.
    ///
    /// # Panics
    ///
    /// Panics if `payload` does not fit in a single packet.
    pub fn packet(self, sequence_id: u8, payload: &[u8]) -> Self {
        match build_packet(payload, sequence_id) {
            Ok(bytes) => self.raw(&bytes),
            Err(e) => panic!("scripted packet does not fit: {e}"),
        }
    }

    /// Append a protocol-10 greeting with the extended block.
    pub fn greeting(self, server_version: &str, connection_id: u32, scramble: &[u8; 20]) -> Self {
        let (head, tail) = scramble.split_at(8);
        let mut w = PacketWriter::new();
        w.write_u8(10);
        w.write_null_string(server_version);
        w.write_u32_le(connection_id);
        w.write_bytes(head);
        w.write_u8(0);
        w.write_u16_le(0xF7FF);
        w.write_u8(33);
        w.write_u16_le(0x0002);
        w.write_u16_le(0x000F);
        w.write_u8(21);
        w.write_zeros(10);
        w.write_bytes(tail);
        self.packet(0, w.as_bytes())
    }

    /// Append an OK packet.
    pub fn ok(self, sequence_id: u8, affected_rows: u8, status_flags: u16) -> Self {
        let mut payload = vec![0x00, affected_rows, 0x00];
        payload.extend_from_slice(&status_flags.to_le_bytes());
        payload.extend_from_slice(&[0, 0]);
        self.packet(sequence_id, &payload)
    }

    /// Append an ERR packet with a SQL state.
    pub fn err(self, sequence_id: u8, code: u16, sql_state: &str, message: &str) -> Self {
        let mut payload = vec![0xFF];
        payload.extend_from_slice(&code.to_le_bytes());
        payload.push(b'#');
        payload.extend_from_slice(sql_state.as_bytes());
        payload.extend_from_slice(message.as_bytes());
        self.packet(sequence_id, &payload)
    }

    /// Append a 5-byte EOF packet.
    pub fn eof(self, sequence_id: u8, status_flags: u16) -> Self {
        let mut payload = vec![0xFE, 0, 0];
        payload.extend_from_slice(&status_flags.to_le_bytes());
        self.packet(sequence_id, &payload)
    }

    /// Append a complete text result set starting at `first_seq`.
    ///
    /// Columns are `(table, name, type code, flags)`; `None` cells are NULL.
    /// Returns the session and the next free sequence number.
    pub fn result_set(
        self,
        first_seq: u8,
        columns: &[(&str, &str, u8, u16)],
        rows: &[Vec<Option<&str>>],
        status_flags: u16,
    ) -> (Self, u8) {
        let mut seq = first_seq;
        let mut next = || {
            let s = seq;
            seq = seq.wrapping_add(1);
            s
        };

        let count = u8::try_from(columns.len()).unwrap_or(u8::MAX);
        let mut session = self.packet(next(), &[count]);
        for (table, name, type_code, flags) in columns {
            session = session.packet(next(), &column_definition(table, name, *type_code, *flags));
        }
        session = session.eof(next(), 0);
        for row in rows {
            let mut w = PacketWriter::new();
            for cell in row {
                match cell {
                    Some(text) => w.write_lenenc_string(text),
                    None => w.write_lenenc_null(),
                }
            }
            session = session.packet(next(), w.as_bytes());
        }
        session = session.eof(next(), status_flags);
        (session, seq)
    }

    fn take(&mut self, len: usize) -> Option<Vec<u8>> {
        if self.incoming.len() < len {
            self.incoming.clear();
            return None;
        }
        Some(self.incoming.drain(..len).collect())
    }
}

/// Column definition payload as a server sends it.
pub fn column_definition(table: &str, name: &str, type_code: u8, flags: u16) -> Vec<u8> {
    let mut w = PacketWriter::new();
    for part in ["def", "test", table, table, name, name] {
        w.write_lenenc_string(part);
    }
    // 0x0c filler, charset, column length
    w.write_u8(0x0C);
    w.write_u16_le(33);
    w.write_u32_le(255);
    w.write_u8(type_code);
    w.write_u16_le(flags);
    // decimals + 2 filler bytes
    w.write_zeros(3);
    w.into_bytes()
}

/// Split a recorded write into its header and payload.
pub fn split_packet(bytes: &[u8]) -> Option<(PacketHeader, &[u8])> {
    let header: &[u8; 4] = bytes.get(..PacketHeader::SIZE)?.try_into().ok()?;
    Some((PacketHeader::from_bytes(header), &bytes[PacketHeader::SIZE..]))
}

#[derive(Debug, Default)]
struct ScriptState {
    pending: VecDeque<Session>,
    current: Option<Session>,
    written: Vec<Vec<u8>>,
    connects: usize,
}

/// In-memory socket that replays scripted server sessions.
///
/// Each `connect` consumes the next queued [`Session`]. Clones share state,
/// so a test can keep a handle while the connection owns the socket.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSocket {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sessions(sessions: impl IntoIterator<Item = Session>) -> Self {
        let socket = Self::new();
        for session in sessions {
            socket.push_session(session);
        }
        socket
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a session for a later connect.
    pub fn push_session(&self, session: Session) {
        self.state().pending.push_back(session);
    }

    /// Every buffer passed to `send`, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }

    /// Number of connect attempts so far.
    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    pub fn is_connected(&self) -> bool {
        self.state().current.is_some()
    }

    /// Unread bytes left in the current session.
    pub fn unread(&self) -> usize {
        self.state().current.as_ref().map_or(0, |s| s.incoming.len())
    }
}

impl Socket for ScriptedSocket {
    fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.connects += 1;
        state.current = None;
        match state.pending.pop_front() {
            Some(session) if session.refuse => Err(TransportError::new(
                TransportErrorKind::Refused,
                "scripted connection refused",
            )),
            Some(session) => {
                state.current = Some(session);
                Ok(())
            }
            None => Err(TransportError::new(
                TransportErrorKind::Connect,
                "no scripted session left",
            )),
        }
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state();
        let Some(session) = state.current.as_mut() else {
            return Err(TransportError::new(
                TransportErrorKind::NotConnected,
                "socket is not connected",
            ));
        };
        session.take(len).ok_or_else(|| {
            TransportError::new(
                TransportErrorKind::Read,
                format!("connection closed while reading {len} bytes"),
            )
        })
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.current.is_none() {
            return Err(TransportError::new(
                TransportErrorKind::NotConnected,
                "socket is not connected",
            ));
        }
        state.written.push(bytes.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.state().current = None;
    }
}
