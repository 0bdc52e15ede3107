//! MySQL wire protocol connection for sqlwire.
//!
//! This crate speaks the MySQL client/server protocol directly over a byte
//! stream. It provides:
//!
//! - Packet framing with sequence numbers
//! - The protocol-10 greeting and `mysql_native_password` authentication
//! - Text query execution with typed result-set decoding
//! - Reconnect-and-retry on transport failures
//! - A [`Socket`] seam with a TCP implementation, plus an in-memory
//!   scripted server behind the `test-util` feature
//!
//! # Example
//!
//! ```rust,no_run
//! use sqlwire_core::{Connectable, Row};
//! use sqlwire_mysql::{MySqlConfig, MySqlConnection};
//!
//! let config = MySqlConfig::new()
//!     .host("localhost")
//!     .port(3306)
//!     .user("root")
//!     .database("mydb");
//!
//! let conn = MySqlConnection::connect(config)?;
//! let table = conn.query_table::<Row>("SELECT id, name FROM users")?;
//! for row in &table {
//!     println!("{:?}", row.get_by_name("name"));
//! }
//! # Ok::<(), sqlwire_core::Error>(())
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod result;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
pub mod socket;
pub mod transport;
pub mod types;

pub use auth::{Handshake, mysql_native_password};
pub use config::MySqlConfig;
pub use connection::{ConnectionState, MySqlConnection};
pub use protocol::OkPacket;
pub use socket::{Socket, TcpSocket};
pub use types::FieldType;
