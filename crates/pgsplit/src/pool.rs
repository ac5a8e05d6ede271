//! Role-bound connection pool
//!
//! Each pool owns the live sessions for exactly one role (read or write).
//! Connections are opened lazily; every physical connect resolves a token
//! through the pool's [`TokenCache`], so credential refresh is confined to
//! the connect path and never blocks queries running on already-open
//! sessions.
//!
//! The idle policy matters: `max_lifetime` is kept shorter than the auth
//! token validity window, so recycling forces periodic reconnection and with
//! it a token refresh. There is no background refresh task.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

use crate::connection::{Connection, ConnectSpec, ConnectionFactory};
use crate::credentials::{CredentialRecord, TokenCache};
use crate::error::{Error, Result};

/// Pool sizing and recycling configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum pool size
    pub max_size: usize,
    /// Maximum time to wait for a connection
    pub acquire_timeout: Duration,
    /// Maximum connection lifetime; kept under the token validity window so
    /// reconnection (and token refresh) happens periodically
    pub max_lifetime: Duration,
    /// Idle timeout (matches the backend proxy idle cutoff, minus a second)
    pub idle_timeout: Duration,
    /// Whether to round-trip a validity check on borrow
    pub test_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(880),
            idle_timeout: Duration::from_secs(59),
            test_on_borrow: false,
        }
    }
}

impl PoolConfig {
    /// Set maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set maximum connection lifetime
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable/disable validity check on borrow
    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }
}

/// Pool statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total connections created
    pub connections_created: u64,
    /// Total connections closed
    pub connections_closed: u64,
    /// Total connection acquisitions
    pub acquisitions: u64,
    /// Number of acquire timeouts
    pub exhausted_count: u64,
}

#[derive(Debug, Default)]
struct AtomicPoolStats {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    acquisitions: AtomicU64,
    exhausted_count: AtomicU64,
}

impl AtomicPoolStats {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            exhausted_count: self.exhausted_count.load(Ordering::Relaxed),
        }
    }
}

/// Credentials a pool connects with: the decoded record plus the token cache
/// that refreshes the password lazily.
pub struct PoolCredentials {
    /// Decoded connection parameters
    pub record: CredentialRecord,
    /// Lazily refreshed auth token, confined to this pool's connect path
    pub tokens: TokenCache,
}

/// Idle entry with the metadata the recycler needs
struct PoolEntry {
    conn: Box<dyn Connection>,
    created_at: Instant,
    last_used: Instant,
}

/// Connection pool bound to one role's credentials.
///
/// Connection checkout/checkin is internally synchronized; callers never add
/// their own locking around pool usage.
pub struct Pool {
    config: PoolConfig,
    credentials: PoolCredentials,
    factory: Arc<dyn ConnectionFactory>,
    /// Idle connections, LIFO
    idle: Mutex<Vec<PoolEntry>>,
    semaphore: Semaphore,
    total: AtomicUsize,
    stats: AtomicPoolStats,
    shutdown: AtomicBool,
}

impl Pool {
    /// Create a new, empty pool. Physical connections are opened on demand.
    pub fn new(
        config: PoolConfig,
        credentials: PoolCredentials,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Semaphore::new(config.max_size),
            idle: Mutex::new(Vec::with_capacity(config.max_size)),
            config,
            credentials,
            factory,
            total: AtomicUsize::new(0),
            stats: AtomicPoolStats::default(),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Acquire a connection, opening a new one if no idle entry is usable.
    pub async fn get(self: &Arc<Self>) -> Result<PooledConnection> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::PoolClosed);
        }

        let permit = tokio::time::timeout(self.config.acquire_timeout, self.semaphore.acquire())
            .await
            .map_err(|_| {
                self.stats.exhausted_count.fetch_add(1, Ordering::Relaxed);
                Error::PoolExhausted {
                    message: format!(
                        "timeout waiting for connection ({}ms)",
                        self.config.acquire_timeout.as_millis()
                    ),
                }
            })?
            .map_err(|_| Error::PoolClosed)?;

        let reused = {
            let mut idle = self.idle.lock().await;
            loop {
                match idle.pop() {
                    Some(entry) => {
                        if self.should_recycle(&entry) {
                            self.discard(entry.conn).await;
                            continue;
                        }
                        if self.config.test_on_borrow && !entry.conn.is_valid().await {
                            self.discard(entry.conn).await;
                            continue;
                        }
                        break Some((entry.conn, entry.created_at));
                    }
                    None => break None,
                }
            }
        };

        let (conn, created_at) = match reused {
            Some(pair) => pair,
            None => match self.create_connection().await {
                Ok(conn) => (conn, Instant::now()),
                Err(e) => {
                    drop(permit);
                    return Err(e);
                }
            },
        };

        self.stats.acquisitions.fetch_add(1, Ordering::Relaxed);

        // The permit is restored when the connection comes back.
        std::mem::forget(permit);

        Ok(PooledConnection {
            conn: Some(conn),
            created_at,
            pool: Arc::clone(self),
        })
    }

    /// Round-trip a liveness check through one connection.
    pub async fn ping(self: &Arc<Self>) -> Result<()> {
        let conn = self.get().await?;
        if conn.is_valid().await {
            Ok(())
        } else {
            Err(Error::connection("liveness check failed"))
        }
    }

    /// Close all idle connections and refuse further checkouts.
    ///
    /// Safe to call repeatedly; connections still checked out are closed as
    /// they come back.
    pub async fn close(&self) {
        self.shutdown.store(true, Ordering::Release);

        let mut idle = self.idle.lock().await;
        for entry in idle.drain(..) {
            self.discard(entry.conn).await;
        }
    }

    /// Current total connection count
    pub fn size(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    /// Snapshot of pool counters
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    async fn create_connection(&self) -> Result<Box<dyn Connection>> {
        // Token resolution is the only credential mutation point; the cache
        // serializes it per pool. A mint failure aborts this connect only.
        let token = self.credentials.tokens.current().await?;
        let spec = ConnectSpec::new(&self.credentials.record, token);

        let conn = self.factory.connect(&spec).await?;
        self.total.fetch_add(1, Ordering::Release);
        self.stats
            .connections_created
            .fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    fn should_recycle(&self, entry: &PoolEntry) -> bool {
        entry.created_at.elapsed() > self.config.max_lifetime
            || entry.last_used.elapsed() > self.config.idle_timeout
    }

    async fn discard(&self, conn: Box<dyn Connection>) {
        let _ = conn.close().await;
        self.total.fetch_sub(1, Ordering::Release);
        self.stats
            .connections_closed
            .fetch_add(1, Ordering::Relaxed);
    }

    async fn return_connection(&self, conn: Box<dyn Connection>, created_at: Instant) {
        if self.shutdown.load(Ordering::Acquire) || conn.needs_discard() {
            self.discard(conn).await;
            self.semaphore.add_permits(1);
            return;
        }

        {
            let mut idle = self.idle.lock().await;
            idle.push(PoolEntry {
                conn,
                created_at,
                last_used: Instant::now(),
            });
        }

        // Release the permit only after the entry is visible; a waiter that
        // wakes first would open a fresh connection and transiently exceed
        // max_size.
        self.semaphore.add_permits(1);
    }
}

/// A connection borrowed from a [`Pool`]; returned on drop.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    created_at: Instant,
    pool: Arc<Pool>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("connection already returned")
            .as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let pool = Arc::clone(&self.pool);
            let created_at = self.created_at;
            tokio::spawn(async move {
                pool.return_connection(conn, created_at).await;
            });
            debug!(pool_size = self.pool.size(), "connection returned to pool");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults_force_reconnection() {
        let config = PoolConfig::default();
        // Lifetime must stay under the 900s token window.
        assert!(config.max_lifetime < Duration::from_secs(900));
        assert_eq!(config.idle_timeout, Duration::from_secs(59));
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::default()
            .with_max_size(20)
            .with_acquire_timeout(Duration::from_secs(5))
            .with_max_lifetime(Duration::from_secs(600))
            .with_idle_timeout(Duration::from_secs(30))
            .with_test_on_borrow(true);

        assert_eq!(config.max_size, 20);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.max_lifetime, Duration::from_secs(600));
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert!(config.test_on_borrow);
    }
}
