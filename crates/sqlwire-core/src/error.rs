//! Error types for sqlwire operations.

use std::fmt;

/// The primary error type for all sqlwire operations.
#[derive(Debug)]
pub enum Error {
    /// The underlying byte stream failed (connect, read or write).
    Transport(TransportError),
    /// The server answered with an ERR packet.
    Server(ServerError),
    /// A packet did not have the expected shape.
    DataReading(ProtocolError),
    /// A password is configured but the server greeting carried no scramble.
    WrongHandshake,
    /// More than one statement was passed to a single-statement entry point.
    TooManyQueries,
    /// An outgoing payload does not fit in a single packet.
    PacketTooLarge { len: usize },
    /// A value could not be read as the requested Rust type.
    Type(TypeError),
    /// A row could not be converted into a caller type.
    Conversion(String),
    /// Invalid configuration.
    Config(String),
    /// The pool or connection is closed.
    Closed,
}

#[derive(Debug)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Failed to establish the connection
    Connect,
    /// Connection refused by the peer
    Refused,
    /// Reading from the stream failed or came up short
    Read,
    /// Writing to the stream failed
    Write,
    /// A read or connect deadline expired
    Timeout,
    /// The socket is not connected
    NotConnected,
}

#[derive(Debug, Clone)]
pub struct ServerError {
    /// MySQL error code (e.g. 1064 for a syntax error)
    pub code: u16,
    /// Five character SQL state, empty when the server sent none
    pub sql_state: String,
    pub message: String,
    /// Query text that triggered the error, when known
    pub sql: Option<String>,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl Error {
    /// Is this a byte-stream failure that a reconnect may cure?
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Server error code, if this is a server error.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Error::Server(e) => Some(e.code),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Server(e) => e.sql.as_deref(),
            _ => None,
        }
    }

    /// Attach the offending query text to a server error.
    #[must_use]
    pub fn with_sql(self, sql: &str) -> Self {
        match self {
            Error::Server(mut e) => {
                e.sql = Some(sql.to_string());
                Error::Server(e)
            }
            other => other,
        }
    }

    /// Shorthand for a `DataReading` error without raw bytes.
    pub fn data_reading(message: impl Into<String>) -> Self {
        Error::DataReading(ProtocolError {
            message: message.into(),
            raw_data: None,
        })
    }
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Build a transport error from an I/O failure, classifying timeouts and refusals.
    pub fn from_io(kind: TransportErrorKind, context: &str, err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                TransportErrorKind::Timeout
            }
            std::io::ErrorKind::ConnectionRefused => TransportErrorKind::Refused,
            _ => kind,
        };
        Self {
            kind,
            message: format!("{context}: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "Transport error: {}", e.message),
            Error::Server(e) => write!(f, "Server error: {e}"),
            Error::DataReading(e) => write!(f, "Data reading error: {}", e.message),
            Error::WrongHandshake => {
                write!(f, "Wrong handshake: no scramble received for password auth")
            }
            Error::TooManyQueries => {
                write!(f, "Too many queries: only one statement is accepted per call")
            }
            Error::PacketTooLarge { len } => write!(
                f,
                "Packet too large: {len} bytes exceeds the single packet limit"
            ),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Conversion(msg) => write!(f, "Row conversion failed: {msg}"),
            Error::Config(msg) => write!(f, "Configuration error: {msg}"),
            Error::Closed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.code)?;
        if !self.sql_state.is_empty() {
            write!(f, " (SQLSTATE {})", self.sql_state)?;
        }
        write!(f, " {}", self.message)?;
        if let Some(sql) = &self.sql {
            write!(f, " while executing `{sql}`")?;
        }
        Ok(())
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport(err)
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::DataReading(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

/// Result type alias for sqlwire operations.
pub type Result<T> = std::result::Result<T, Error>;
