//! Pool sizing and refresh configuration.

use serde::{Deserialize, Serialize};
use sqlwire_core::{Error, Result};
use std::time::Duration;

/// How the pool keeps its ideal connection current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// A background thread recomputes the ideal connection on this interval
    /// (milliseconds when serialized).
    Periodic(#[serde(with = "duration_ms")] Duration),
    /// Every request recomputes the ideal connection itself.
    OnDemand,
}

impl Default for RefreshMode {
    fn default() -> Self {
        RefreshMode::Periodic(Duration::from_millis(500))
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections opened by `open()`
    pub initial_connections: usize,
    /// Growth never goes beyond this many connections
    pub max_connections: usize,
    /// A connection with fewer in-flight callers ends the scan early
    pub pass_through_threshold: usize,
    /// The pool grows when its ideal connection has more callers than this
    pub max_accessors: usize,
    /// Connections opened per growth step
    pub connections_to_add: usize,
    pub refresh: RefreshMode,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_connections: 10,
            max_connections: 30,
            pass_through_threshold: 4,
            max_accessors: 8,
            connections_to_add: 5,
            refresh: RefreshMode::default(),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_connections(mut self, n: usize) -> Self {
        self.initial_connections = n;
        self
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }

    pub fn pass_through_threshold(mut self, n: usize) -> Self {
        self.pass_through_threshold = n;
        self
    }

    pub fn max_accessors(mut self, n: usize) -> Self {
        self.max_accessors = n;
        self
    }

    pub fn connections_to_add(mut self, n: usize) -> Self {
        self.connections_to_add = n;
        self
    }

    /// Refresh in the background every `interval`.
    pub fn refresh_every(mut self, interval: Duration) -> Self {
        self.refresh = RefreshMode::Periodic(interval);
        self
    }

    /// Recompute the ideal connection on every request.
    pub fn refresh_on_demand(mut self) -> Self {
        self.refresh = RefreshMode::OnDemand;
        self
    }

    /// Check the sizing is coherent.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        if self.initial_connections == 0 {
            return Err(Error::Config(
                "initial_connections must be at least 1".to_string(),
            ));
        }
        if self.max_connections < self.initial_connections {
            return Err(Error::Config(format!(
                "max_connections ({}) is below initial_connections ({})",
                self.max_connections, self.initial_connections
            )));
        }
        if let RefreshMode::Periodic(interval) = self.refresh {
            if interval.is_zero() {
                return Err(Error::Config(
                    "periodic refresh interval must be non-zero".to_string(),
                ));
            }
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
