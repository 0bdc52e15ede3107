//! Core types and traits for the sqlwire MySQL driver.
//!
//! - `Value` tagged union for decoded column values
//! - `Row`, `ColumnInfo` and `Table` for result sets
//! - `FromValue` / `FromRow` conversions into caller types
//! - `Connectable` capability shared by connections and pools
//! - `Error` taxonomy used across all sqlwire crates

pub mod connection;
pub mod error;
pub mod row;
pub mod table;
pub mod value;

pub use connection::{
    Connectable, ConnectionObserver, TracingObserver, default_observer, ensure_single_statement,
};
pub use error::{
    Error, ProtocolError, Result, ServerError, TransportError, TransportErrorKind, TypeError,
};
pub use row::{Column, ColumnInfo, FromRow, FromValue, Row, column_flags};
pub use table::Table;
pub use value::Value;
