//! sqlwire - a blocking MySQL wire-protocol driver.
//!
//! sqlwire speaks the MySQL client/server protocol directly over a byte
//! stream, providing:
//!
//! - Handshake and `mysql_native_password` authentication
//! - Text queries decoded into typed rows
//! - Transparent reconnect-and-retry on transport failures
//! - A load-balancing connection pool for concurrent callers
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sqlwire::prelude::*;
//!
//! #[derive(Debug)]
//! struct Hero {
//!     id: u64,
//!     name: String,
//!     age: Option<i32>,
//! }
//!
//! impl FromRow for Hero {
//!     fn from_row(row: Row) -> Result<Self> {
//!         Ok(Hero {
//!             id: row.get_named("id")?,
//!             name: row.get_named("name")?,
//!             age: row.get_named("age")?,
//!         })
//!     }
//! }
//!
//! let pool = Pool::mysql(
//!     MySqlConfig::new().host("localhost").user("root").database("heroes"),
//!     PoolConfig::new(),
//! );
//! pool.open()?;
//!
//! let heroes = pool.query_table::<Hero>("SELECT id, name, age FROM heroes")?;
//! for hero in &heroes {
//!     println!("{hero:?}");
//! }
//!
//! let deleted = pool.query_no_result("DELETE FROM heroes WHERE age IS NULL")?;
//! println!("removed {deleted}");
//! # Ok::<(), sqlwire::Error>(())
//! ```

pub use sqlwire_core::{
    Column, ColumnInfo, Connectable, ConnectionObserver, Error, FromRow, FromValue, ProtocolError,
    Result, Row, ServerError, Table, TracingObserver, TransportError, TransportErrorKind,
    TypeError, Value, column_flags,
};

pub use sqlwire_mysql::{
    ConnectionState, FieldType, Handshake, MySqlConfig, MySqlConnection, OkPacket, Socket,
    TcpSocket,
};

pub use sqlwire_pool::{Pool, PoolConfig, PoolMember, PoolStats, RefreshMode};

/// Commonly used items.
pub mod prelude {
    pub use crate::{
        Connectable, Error, FromRow, MySqlConfig, MySqlConnection, Pool, PoolConfig, Result, Row,
        Table, Value,
    };
}
