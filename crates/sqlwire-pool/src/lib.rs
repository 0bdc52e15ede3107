//! Load-balancing connection pool for sqlwire.
//!
//! A [`Pool`] opens a fixed set of connections up front and routes every
//! query to its current *ideal* connection: the first one found with fewer
//! in-flight callers than the pass-through threshold, or else the least
//! loaded. When even the ideal connection is crowded the pool grows.
//!
//! The ideal connection is either refreshed by a background thread on a
//! fixed interval or recomputed on every request, see [`RefreshMode`].

pub mod config;

pub use config::{PoolConfig, RefreshMode};

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sqlwire_core::{ColumnInfo, Connectable, Error, FromRow, Result};
use sqlwire_mysql::{MySqlConfig, MySqlConnection, Socket};

/// A connection the pool can balance across.
pub trait PoolMember: Connectable + 'static {
    /// Callers currently running or waiting on this connection.
    fn in_flight(&self) -> usize;
}

impl<S: Socket + 'static> PoolMember for MySqlConnection<S> {
    fn in_flight(&self) -> usize {
        MySqlConnection::in_flight(self)
    }
}

/// Pick the ideal index from per-connection loads.
///
/// Scans in order keeping the least loaded so far and stops at the first
/// load below `pass_through`. Returns the index and its load, or `None`
/// for an empty pool.
pub fn select_ideal(
    loads: impl IntoIterator<Item = usize>,
    pass_through: usize,
) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    for (index, load) in loads.into_iter().enumerate() {
        if best.is_none_or(|(_, min)| load < min) {
            best = Some((index, load));
        }
        if load < pass_through {
            break;
        }
    }
    best
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of open connections
    pub total_connections: usize,
    /// In-flight callers summed over all connections
    pub in_flight: usize,
    /// Index of the cached ideal connection
    pub ideal_index: usize,
}

type Factory<C> = Box<dyn Fn() -> Result<C> + Send + Sync>;

struct Members<C> {
    connections: Vec<Arc<C>>,
    ideal: usize,
}

struct Shared<C> {
    config: PoolConfig,
    factory: Factory<C>,
    members: Mutex<Members<C>>,
    /// Held while a batch is being opened, so one saturated scan adds one batch
    growing: Mutex<()>,
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl<C: PoolMember> Shared<C> {
    fn members(&self) -> MutexGuard<'_, Members<C>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[allow(clippy::result_large_err)]
    fn open_one(&self) -> Result<C> {
        let conn = (self.factory)()?;
        conn.open()?;
        Ok(conn)
    }

    /// Select and cache the ideal connection. Returns it with its load and
    /// the pool size.
    #[allow(clippy::result_large_err)]
    fn scan(&self) -> Result<(Arc<C>, usize, usize)> {
        let mut members = self.members();
        let loads = members.connections.iter().map(|c| c.in_flight());
        let Some((index, load)) = select_ideal(loads, self.config.pass_through_threshold) else {
            return Err(Error::Closed);
        };
        members.ideal = index;
        Ok((
            Arc::clone(&members.connections[index]),
            load,
            members.connections.len(),
        ))
    }

    fn saturated(&self, load: usize, size: usize) -> bool {
        load > self.config.max_accessors && size < self.config.max_connections
    }

    #[allow(clippy::result_large_err)]
    fn compute_ideal(&self) -> Result<Arc<C>> {
        let (selected, load, size) = self.scan()?;
        if !self.saturated(load, size) {
            return Ok(selected);
        }

        let _growing = self.growing.lock().unwrap_or_else(PoisonError::into_inner);
        // another caller may have grown the pool while we waited
        let (selected, load, size) = self.scan()?;
        if self.saturated(load, size) {
            if let Some(fresh) = self.grow() {
                return Ok(fresh);
            }
        }
        Ok(selected)
    }

    /// Open up to `connections_to_add` connections and make the last one
    /// ideal. Failed opens are skipped.
    fn grow(&self) -> Option<Arc<C>> {
        let opened: Vec<Arc<C>> = (0..self.config.connections_to_add)
            .filter_map(|_| match self.open_one() {
                Ok(conn) => Some(Arc::new(conn)),
                Err(e) => {
                    tracing::debug!(
                        target: "sqlwire::pool",
                        error = %e,
                        "skipping connection that failed to open"
                    );
                    None
                }
            })
            .collect();

        let mut members = self.members();
        if members.connections.is_empty() {
            // closed while we were opening
            drop(members);
            close_all(opened);
            return None;
        }
        let room = self
            .config
            .max_connections
            .saturating_sub(members.connections.len());
        let before = members.connections.len();
        let mut opened = opened.into_iter();
        members.connections.extend(opened.by_ref().take(room));
        let surplus: Vec<_> = opened.collect();
        let fresh = if members.connections.len() > before {
            members.ideal = members.connections.len() - 1;
            members.connections.last().cloned()
        } else {
            None
        };
        let total = members.connections.len();
        drop(members);
        close_all(surplus);

        if fresh.is_some() {
            tracing::info!(target: "sqlwire::pool", total, "pool grew");
        }
        fresh
    }

    fn cached_ideal(&self) -> Result<Arc<C>> {
        let members = self.members();
        members
            .connections
            .get(members.ideal)
            .or_else(|| members.connections.first())
            .cloned()
            .ok_or(Error::Closed)
    }

    fn is_stopped(&self) -> MutexGuard<'_, bool> {
        self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn close_all<C: PoolMember>(connections: impl IntoIterator<Item = Arc<C>>) {
    for conn in connections {
        if let Err(e) = conn.close() {
            tracing::debug!(target: "sqlwire::pool", error = %e, "error closing pooled connection");
        }
    }
}

fn refresh_loop<C: PoolMember>(shared: &Weak<Shared<C>>, interval: Duration) {
    loop {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        {
            let stopped = shared.is_stopped();
            let (stopped, _) = shared
                .wake
                .wait_timeout_while(stopped, interval, |stopped| !*stopped)
                .unwrap_or_else(PoisonError::into_inner);
            if *stopped {
                return;
            }
        }
        if let Err(e) = shared.compute_ideal() {
            tracing::debug!(target: "sqlwire::pool", error = %e, "refresh skipped");
        }
    }
}

/// Connection pool routing queries to its least-loaded connection.
///
/// # Example
///
/// ```rust,no_run
/// use sqlwire_core::{Connectable, Row};
/// use sqlwire_mysql::MySqlConfig;
/// use sqlwire_pool::{Pool, PoolConfig};
///
/// let pool = Pool::mysql(
///     MySqlConfig::new().host("db").user("app").database("shop"),
///     PoolConfig::new().initial_connections(4),
/// );
/// pool.open()?;
/// let rows = pool.query_table::<Row>("SELECT * FROM orders LIMIT 10")?;
/// # Ok::<(), sqlwire_core::Error>(())
/// ```
pub struct Pool<C: PoolMember> {
    shared: Arc<Shared<C>>,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl<C: PoolMember> std::fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Pool<MySqlConnection> {
    /// Pool of TCP MySQL connections sharing one configuration.
    pub fn mysql(connection: MySqlConfig, config: PoolConfig) -> Self {
        Self::new(config, move || Ok(MySqlConnection::new(connection.clone())))
    }
}

impl<C: PoolMember> Pool<C> {
    /// Create an unopened pool. `factory` builds unopened connections; the
    /// pool opens them.
    pub fn new<F>(config: PoolConfig, factory: F) -> Self
    where
        F: Fn() -> Result<C> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                config,
                factory: Box::new(factory),
                members: Mutex::new(Members {
                    connections: Vec::new(),
                    ideal: 0,
                }),
                growing: Mutex::new(()),
                stopped: Mutex::new(true),
                wake: Condvar::new(),
            }),
            refresher: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn is_open(&self) -> bool {
        !self.shared.members().connections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.shared.members().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether growth has reached `max_connections`.
    pub fn at_capacity(&self) -> bool {
        self.len() >= self.shared.config.max_connections
    }

    /// Snapshot of the pooled connections in routing order.
    pub fn connections(&self) -> Vec<Arc<C>> {
        self.shared.members().connections.clone()
    }

    pub fn stats(&self) -> PoolStats {
        let members = self.shared.members();
        PoolStats {
            total_connections: members.connections.len(),
            in_flight: members.connections.iter().map(|c| c.in_flight()).sum(),
            ideal_index: members.ideal,
        }
    }

    /// Rescan loads, growing the pool if the best pick is crowded, and
    /// cache the result.
    #[allow(clippy::result_large_err)]
    pub fn compute_ideal(&self) -> Result<Arc<C>> {
        self.shared.compute_ideal()
    }

    /// Connection the next query goes to.
    #[allow(clippy::result_large_err)]
    pub fn ideal(&self) -> Result<Arc<C>> {
        match self.shared.config.refresh {
            RefreshMode::OnDemand => self.shared.compute_ideal(),
            RefreshMode::Periodic(_) => self.shared.cached_ideal(),
        }
    }

    #[allow(clippy::result_large_err)]
    fn start_refresher(&self, interval: Duration) -> Result<()> {
        *self.shared.is_stopped() = false;
        let weak = Arc::downgrade(&self.shared);
        let handle = thread::Builder::new()
            .name("sqlwire-pool-refresh".to_string())
            .spawn(move || refresh_loop(&weak, interval))
            .map_err(|e| Error::Config(format!("cannot start pool refresher: {e}")))?;
        *self
            .refresher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    fn stop_refresher(&self) {
        *self.shared.is_stopped() = true;
        self.shared.wake.notify_all();
        let handle = self
            .refresher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!(target: "sqlwire::pool", "pool refresher panicked");
            }
        }
    }
}

impl<C: PoolMember> Connectable for Pool<C> {
    /// Open `initial_connections` connections. Opening an open pool is a
    /// no-op.
    fn open(&self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let config = &self.shared.config;
        config.validate()?;

        let mut opened = Vec::with_capacity(config.initial_connections);
        for _ in 0..config.initial_connections {
            match self.shared.open_one() {
                Ok(conn) => opened.push(Arc::new(conn)),
                Err(e) => {
                    close_all(opened);
                    return Err(e);
                }
            }
        }

        {
            let mut members = self.shared.members();
            if !members.connections.is_empty() {
                // another caller opened the pool first
                drop(members);
                close_all(opened);
                return Ok(());
            }
            members.connections = opened;
            members.ideal = 0;
        }
        tracing::info!(
            target: "sqlwire::pool",
            connections = config.initial_connections,
            "pool opened"
        );

        if let RefreshMode::Periodic(interval) = config.refresh {
            self.start_refresher(interval)?;
        }
        Ok(())
    }

    /// Stop the refresher and close every connection.
    fn close(&self) -> Result<()> {
        self.stop_refresher();
        let connections = {
            let mut members = self.shared.members();
            members.ideal = 0;
            std::mem::take(&mut members.connections)
        };
        if !connections.is_empty() {
            tracing::info!(
                target: "sqlwire::pool",
                connections = connections.len(),
                "pool closed"
            );
        }
        close_all(connections);
        Ok(())
    }

    fn query_rows<T, F>(&self, sql: &str, on_row: F) -> Result<Arc<ColumnInfo>>
    where
        T: FromRow,
        F: FnMut(T),
    {
        self.ideal()?.query_rows(sql, on_row)
    }

    fn query_no_result(&self, sql: &str) -> Result<u64> {
        self.ideal()?.query_no_result(sql)
    }
}

impl<C: PoolMember> Drop for Pool<C> {
    fn drop(&mut self) {
        self.stop_refresher();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlwire_core::{Row, Value};
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant;

    #[derive(Debug)]
    struct Fake {
        id: usize,
        load: AtomicUsize,
        open: AtomicBool,
    }

    impl Fake {
        fn set_load(&self, load: usize) {
            self.load.store(load, Ordering::SeqCst);
        }
    }

    impl Connectable for Fake {
        fn open(&self) -> Result<()> {
            self.open.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn close(&self) -> Result<()> {
            self.open.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn query_rows<T, F>(&self, _sql: &str, mut on_row: F) -> Result<Arc<ColumnInfo>>
        where
            T: FromRow,
            F: FnMut(T),
        {
            let row = Row::new(vec!["id".to_string()], vec![Value::UBigInt(self.id as u64)]);
            on_row(T::from_row(row)?);
            Ok(Arc::new(ColumnInfo::from_names(["id"])))
        }

        fn query_no_result(&self, _sql: &str) -> Result<u64> {
            Ok(self.id as u64)
        }
    }

    impl PoolMember for Fake {
        fn in_flight(&self) -> usize {
            self.load.load(Ordering::SeqCst)
        }
    }

    /// Factory handing out sequential ids; ids listed in `failing` fail.
    fn factory(failing: &'static [usize]) -> impl Fn() -> Result<Fake> + Send + Sync {
        let next = AtomicUsize::new(0);
        move || {
            let id = next.fetch_add(1, Ordering::SeqCst);
            if failing.contains(&id) {
                return Err(Error::Config(format!("fake {id} unavailable")));
            }
            Ok(Fake {
                id,
                load: AtomicUsize::new(0),
                open: AtomicBool::new(false),
            })
        }
    }

    fn on_demand(initial: usize) -> PoolConfig {
        PoolConfig::new()
            .initial_connections(initial)
            .max_connections(30)
            .refresh_on_demand()
    }

    fn set_loads(pool: &Pool<Fake>, loads: &[usize]) {
        for (conn, load) in pool.connections().iter().zip(loads) {
            conn.set_load(*load);
        }
    }

    #[test]
    fn select_passes_through_first_idle_connection() {
        assert_eq!(select_ideal([5, 5, 5, 0], 4), Some((3, 0)));
        assert_eq!(select_ideal([6, 2, 0], 4), Some((1, 2)));
        assert_eq!(select_ideal([7, 5, 6], 4), Some((1, 5)));
        assert_eq!(select_ideal([5, 5], 4), Some((0, 5)));
        assert_eq!(select_ideal([], 4), None);
    }

    #[test]
    fn routes_to_least_loaded() {
        let pool = Pool::new(on_demand(4), factory(&[]));
        pool.open().unwrap();
        set_loads(&pool, &[5, 5, 5, 0]);

        assert_eq!(pool.compute_ideal().unwrap().id, 3);
        assert_eq!(pool.query_no_result("UPDATE t SET a = 1").unwrap(), 3);
        assert_eq!(pool.stats().ideal_index, 3);
        assert_eq!(pool.stats().in_flight, 15);
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn saturated_pool_grows_and_selects_freshest() {
        let pool = Pool::new(
            on_demand(2).max_connections(4).max_accessors(8),
            factory(&[]),
        );
        pool.open().unwrap();
        set_loads(&pool, &[9, 9]);

        let ideal = pool.compute_ideal().unwrap();
        assert_eq!(pool.len(), 4);
        assert_eq!(ideal.id, 3);
        assert!(ideal.open.load(Ordering::SeqCst));
        assert!(pool.at_capacity());
        assert_eq!(pool.stats().ideal_index, 3);

        // surplus from the step beyond max_connections was closed
        assert_eq!(
            pool.connections().iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn concurrent_saturated_callers_add_one_batch() {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let make = factory(&[]);
        let pool = Pool::new(
            on_demand(2).connections_to_add(5).max_accessors(8),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                make()
            },
        );
        pool.open().unwrap();
        set_loads(&pool, &[9, 9]);

        let pool = Arc::new(pool);
        let start = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    pool.compute_ideal().map(|c| c.id)
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().unwrap() >= 2);
        }

        assert_eq!(pool.len(), 7);
        assert_eq!(opened.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn load_at_max_accessors_does_not_grow() {
        let pool = Pool::new(on_demand(2).max_accessors(8), factory(&[]));
        pool.open().unwrap();
        set_loads(&pool, &[8, 8]);
        assert_eq!(pool.compute_ideal().unwrap().id, 0);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn no_growth_at_capacity() {
        let pool = Pool::new(on_demand(2).max_connections(2), factory(&[]));
        pool.open().unwrap();
        set_loads(&pool, &[20, 12]);
        assert_eq!(pool.compute_ideal().unwrap().id, 1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn failed_growth_opens_are_skipped() {
        let pool = Pool::new(on_demand(1).connections_to_add(3), factory(&[2, 3]));
        pool.open().unwrap();
        set_loads(&pool, &[10]);
        let ideal = pool.compute_ideal().unwrap();
        assert_eq!(ideal.id, 1);
        assert_eq!(pool.len(), 2);

        let pool = Pool::new(on_demand(1).connections_to_add(2), factory(&[1, 2]));
        pool.open().unwrap();
        set_loads(&pool, &[10]);
        assert_eq!(pool.compute_ideal().unwrap().id, 0);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn failed_initial_open_is_returned() {
        let pool = Pool::new(on_demand(3), factory(&[1]));
        assert!(matches!(pool.open(), Err(Error::Config(_))));
        assert!(!pool.is_open());
    }

    #[test]
    fn closed_pool_rejects_queries() {
        let pool = Pool::new(on_demand(2), factory(&[]));
        assert!(matches!(pool.query_no_result("SELECT 1"), Err(Error::Closed)));

        pool.open().unwrap();
        let conns = pool.connections();
        pool.close().unwrap();
        assert!(conns.iter().all(|c| !c.open.load(Ordering::SeqCst)));
        assert!(matches!(
            pool.query_table::<Row>("SELECT 1"),
            Err(Error::Closed)
        ));
        pool.close().unwrap();
    }

    #[test]
    fn open_is_idempotent() {
        let pool = Pool::new(on_demand(2), factory(&[]));
        pool.open().unwrap();
        pool.open().unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn periodic_refresh_updates_the_cached_ideal() {
        let pool = Pool::new(
            PoolConfig::new()
                .initial_connections(3)
                .refresh_every(Duration::from_millis(5)),
            factory(&[]),
        );
        pool.open().unwrap();
        assert_eq!(pool.ideal().unwrap().id, 0);

        set_loads(&pool, &[6, 7, 1]);
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.ideal().unwrap().id != 2 {
            assert!(Instant::now() < deadline, "refresher never ran");
            thread::sleep(Duration::from_millis(2));
        }

        let table = pool.query_table::<Row>("SELECT id").unwrap();
        assert_eq!(table.rows()[0].get_as::<u64>(0).unwrap(), 2);

        pool.close().unwrap();
        assert!(pool.refresher.lock().unwrap().is_none());
    }

    #[test]
    fn dropping_the_pool_stops_the_refresher() {
        let pool = Pool::new(
            PoolConfig::new()
                .initial_connections(1)
                .refresh_every(Duration::from_millis(5)),
            factory(&[]),
        );
        pool.open().unwrap();
        let weak = Arc::downgrade(&pool.shared);
        drop(pool);
        assert!(weak.upgrade().is_none());
    }
}
