//! MySQL connection.
//!
//! A [`MySqlConnection`] owns one socket and serializes every exchange on it
//! behind a mutex. Callers waiting for the mutex are counted in an in-flight
//! counter that the pool reads to route new work.
//!
//! Each query runs as: ensure open, send `COM_QUERY`, interpret the first
//! response, then read columns and rows. A transport failure anywhere in
//! that sequence closes the socket and the whole exchange is retried, up to
//! `max_attempts` times. Server errors are returned as-is, carrying the SQL.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sqlwire_core::{
    ColumnInfo, Connectable, Error, FromRow, Result, ensure_single_statement,
};

use crate::auth::{Handshake, build_auth_response, parse_handshake};
use crate::config::MySqlConfig;
use crate::protocol::{Command, OkPacket};
use crate::result::{Response, drain_results, interpret_response, read_columns, read_rows};
use crate::socket::{Socket, TcpSocket};
use crate::transport::{read_packet, write_command, write_packet};

/// Connection state in the protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; the next query opens one
    Disconnected,
    /// Greeting received, credentials sent
    Authenticating,
    /// Ready for queries
    Ready,
}

struct Wire<S> {
    socket: S,
    state: ConnectionState,
    handshake: Option<Handshake>,
    last_ok: Option<OkPacket>,
}

impl<S: Socket> Wire<S> {
    fn is_open(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    fn mark_closed(&mut self) {
        self.socket.close();
        self.state = ConnectionState::Disconnected;
        self.handshake = None;
    }

    /// Connect, read the greeting and authenticate. Any failure leaves the
    /// session disconnected.
    #[allow(clippy::result_large_err)]
    fn open(&mut self, config: &MySqlConfig) -> Result<()> {
        self.mark_closed();
        let result = self.authenticate(config);
        if result.is_err() {
            self.mark_closed();
        }
        result
    }

    #[allow(clippy::result_large_err)]
    fn authenticate(&mut self, config: &MySqlConfig) -> Result<()> {
        self.socket.connect()?;

        let greeting = read_packet(&mut self.socket)?;
        let handshake = parse_handshake(&greeting.payload)?;
        let response = build_auth_response(config, &handshake)?;
        self.state = ConnectionState::Authenticating;
        write_packet(&mut self.socket, &response, greeting.sequence_id.wrapping_add(1))?;

        let reply = read_packet(&mut self.socket)?;
        if reply.payload.first() == Some(&0xFE) {
            return Err(Error::data_reading(
                "server requested an authentication method other than mysql_native_password",
            ));
        }
        match interpret_response(&reply.payload)? {
            Response::Ok(_) => {}
            Response::ResultSet(_) => {
                return Err(Error::data_reading("unexpected reply to authentication"));
            }
        }

        tracing::debug!(
            target: "sqlwire::mysql",
            server_version = %handshake.server_version,
            connection_id = handshake.connection_id,
            user = %config.user,
            "authenticated"
        );
        self.handshake = Some(handshake);
        self.state = ConnectionState::Ready;
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn send_command(&mut self, command: Command, argument: &[u8]) -> Result<()> {
        write_command(&mut self.socket, command, argument)
    }

    /// Run `sql` and convert the first result set's rows.
    ///
    /// Chained results after the first are drained.
    #[allow(clippy::result_large_err)]
    fn query<T, F>(&mut self, sql: &str, convert: F) -> Result<(Arc<ColumnInfo>, Vec<T>)>
    where
        F: FnMut(sqlwire_core::Row) -> Result<T>,
    {
        self.send_command(Command::Query, sql.as_bytes())?;
        let first = read_packet(&mut self.socket)?;
        match interpret_response(&first.payload)? {
            Response::Ok(ok) => {
                if ok.more_results() {
                    drain_results(&mut self.socket)?;
                }
                self.last_ok = Some(ok);
                Ok((Arc::new(ColumnInfo::default()), Vec::new()))
            }
            Response::ResultSet(count) => {
                let columns = read_columns(&mut self.socket, count)?;
                if count == 0 {
                    return Ok((columns, Vec::new()));
                }
                let (rows, eof) = read_rows(&mut self.socket, &columns, convert)?;
                if eof.more_results() {
                    drain_results(&mut self.socket)?;
                }
                Ok((columns, rows))
            }
        }
    }

    /// Run `sql` expecting no rows; a result set is read and discarded.
    #[allow(clippy::result_large_err)]
    fn execute(&mut self, sql: &str) -> Result<OkPacket> {
        self.send_command(Command::Query, sql.as_bytes())?;
        let first = read_packet(&mut self.socket)?;
        let ok = match interpret_response(&first.payload)? {
            Response::Ok(ok) => {
                if ok.more_results() {
                    drain_results(&mut self.socket)?;
                }
                ok
            }
            Response::ResultSet(count) => {
                let columns = read_columns(&mut self.socket, count)?;
                let (_, eof) = read_rows(&mut self.socket, &columns, |_| Ok(()))?;
                if eof.more_results() {
                    drain_results(&mut self.socket)?;
                }
                OkPacket::default()
            }
        };
        self.last_ok = Some(ok.clone());
        Ok(ok)
    }

    #[allow(clippy::result_large_err)]
    fn ping(&mut self) -> Result<()> {
        self.send_command(Command::Ping, &[])?;
        let reply = read_packet(&mut self.socket)?;
        match interpret_response(&reply.payload)? {
            Response::Ok(_) => Ok(()),
            Response::ResultSet(_) => Err(Error::data_reading("unexpected reply to ping")),
        }
    }
}

/// Decrements the in-flight counter when dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// MySQL connection over a [`Socket`].
///
/// Safe to share between threads; exchanges are serialized internally.
pub struct MySqlConnection<S: Socket = TcpSocket> {
    config: MySqlConfig,
    session: Mutex<Wire<S>>,
    in_flight: AtomicUsize,
}

impl<S: Socket> std::fmt::Debug for MySqlConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl MySqlConnection<TcpSocket> {
    /// Create an unopened TCP connection; the first query opens it.
    pub fn new(config: MySqlConfig) -> Self {
        let socket = config.tcp_socket();
        Self::with_socket(config, socket)
    }

    /// Create a TCP connection and open it immediately.
    #[allow(clippy::result_large_err)]
    pub fn connect(config: MySqlConfig) -> Result<Self> {
        config.validate()?;
        let conn = Self::new(config);
        conn.open()?;
        Ok(conn)
    }
}

impl<S: Socket> MySqlConnection<S> {
    /// Create an unopened connection over a caller-provided socket.
    pub fn with_socket(config: MySqlConfig, socket: S) -> Self {
        Self {
            config,
            session: Mutex::new(Wire {
                socket,
                state: ConnectionState::Disconnected,
                handshake: None,
                last_ok: None,
            }),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    /// Callers currently running or waiting to run an exchange.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Wire<S>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_open()
    }

    /// Greeting of the current session, if open.
    pub fn handshake(&self) -> Option<Handshake> {
        self.lock().handshake.clone()
    }

    /// OK packet of the most recent statement that produced one.
    pub fn last_ok(&self) -> Option<OkPacket> {
        self.lock().last_ok.clone()
    }

    /// Run one exchange with reconnect-and-retry on transport failures.
    #[allow(clippy::result_large_err)]
    fn run<R>(
        &self,
        label: &str,
        mut exchange: impl FnMut(&mut Wire<S>) -> Result<R>,
    ) -> Result<R> {
        let _in_flight = InFlight::enter(&self.in_flight);
        let mut session = self.lock();
        let max_attempts = self.config.max_attempts.max(1);
        let observer = &self.config.observer;

        let mut attempt = 1;
        loop {
            let result = if session.is_open() {
                exchange(&mut *session)
            } else {
                session
                    .open(&self.config)
                    .and_then(|()| exchange(&mut *session))
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transport() => {
                    session.mark_closed();
                    if attempt >= max_attempts {
                        observer.on_error(label, &e);
                        return Err(e);
                    }
                    observer.on_reconnect(attempt, max_attempts, &e);
                    attempt += 1;
                }
                Err(e) => {
                    // the stream position is unknown after a malformed packet
                    if matches!(e, Error::DataReading(_) | Error::WrongHandshake) {
                        session.mark_closed();
                    }
                    let e = e.with_sql(label);
                    observer.on_error(label, &e);
                    return Err(e);
                }
            }
        }
    }

    /// Run a statement and return its full OK packet (affected rows and
    /// last insert id).
    #[allow(clippy::result_large_err)]
    pub fn execute(&self, sql: &str) -> Result<OkPacket> {
        ensure_single_statement(sql)?;
        self.run(sql, |session| session.execute(sql))
    }

    /// Check that the server answers, reopening if needed.
    #[allow(clippy::result_large_err)]
    pub fn ping(&self) -> Result<()> {
        self.run("COM_PING", Wire::ping)
    }
}

impl<S: Socket> Connectable for MySqlConnection<S> {
    fn open(&self) -> Result<()> {
        let _in_flight = InFlight::enter(&self.in_flight);
        let mut session = self.lock();
        let result = session.open(&self.config);
        if let Err(e) = &result {
            self.config.observer.on_error("connect", e);
        }
        result
    }

    fn close(&self) -> Result<()> {
        let mut session = self.lock();
        if session.is_open() {
            // best effort; the socket is dropped either way
            let _ = session.send_command(Command::Quit, &[]);
        }
        session.mark_closed();
        Ok(())
    }

    fn query_rows<T, F>(&self, sql: &str, mut on_row: F) -> Result<Arc<ColumnInfo>>
    where
        T: FromRow,
        F: FnMut(T),
    {
        ensure_single_statement(sql)?;
        let (columns, rows) = self.run(sql, |session| session.query(sql, T::from_row))?;
        for row in rows {
            on_row(row);
        }
        Ok(columns)
    }

    fn query_no_result(&self, sql: &str) -> Result<u64> {
        self.execute(sql).map(|ok| ok.affected_rows)
    }
}
