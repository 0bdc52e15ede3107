//! MySQL connection configuration.
//!
//! Built with chained setters or deserialized (durations in milliseconds):
//!
//! ```
//! use sqlwire_mysql::MySqlConfig;
//!
//! let config: MySqlConfig = serde_json::from_str(
//!     r#"{"host": "db", "user": "app", "database": "shop", "read_timeout": 2000}"#,
//! ).unwrap();
//! assert_eq!(config.port, 3306);
//! assert_eq!(config.read_timeout.as_millis(), 2000);
//! ```

use crate::protocol::capabilities::{CLIENT_CONNECT_WITH_DB, DESIRED_CLIENT_FLAGS};
use crate::socket::TcpSocket;
use serde::{Deserialize, Serialize};
use sqlwire_core::connection::{ConnectionObserver, default_observer};
use sqlwire_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// MySQL connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MySqlConfig {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 3306)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    pub password: Option<String>,
    /// Database selected at connect time
    pub database: Option<String>,
    /// Attempts per query before a transport failure is returned (default: 3)
    pub max_attempts: u32,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub read_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub write_timeout: Duration,
    /// Receives reconnect and error events
    #[serde(skip, default = "default_observer")]
    pub observer: Arc<dyn ConnectionObserver>,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            database: None,
            max_attempts: 3,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            observer: default_observer(),
        }
    }
}

impl MySqlConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Replace the event observer.
    pub fn observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Get the socket address string for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// TCP socket for this host with the configured timeouts.
    pub fn tcp_socket(&self) -> TcpSocket {
        TcpSocket::new(self.host.clone(), self.port).timeouts(
            self.connect_timeout,
            self.read_timeout,
            self.write_timeout,
        )
    }

    /// Client capability flags for a server advertising `server_lower`.
    ///
    /// The upper 16 bits are never masked out. CONNECT_WITH_DB is added after
    /// the intersection whenever a database is configured.
    pub fn capability_flags(&self, server_lower: u16) -> u32 {
        let mut flags = DESIRED_CLIENT_FLAGS & (u32::from(server_lower) | 0xFFFF_0000);
        if self.database.is_some() {
            flags |= CLIENT_CONNECT_WITH_DB;
        }
        flags
    }

    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
