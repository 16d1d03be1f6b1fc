//! Fixed-capacity pool of registry connections.
//!
//! Every connection is opened at startup. A checkout waits on a semaphore
//! with one permit per connection, bounded by the configured checkout
//! timeout. The returned [`PooledConnection`] guard owns both the
//! connection and the permit, so the slot is given back on every exit path:
//!
//! - [`PooledConnection::release`] checks the connection in, pinging it first
//! - dropping the guard (early return, cancelled future, panic unwind)
//!   schedules the same check-in on the runtime
//!
//! A connection that fails its liveness check is discarded and a fresh one
//! is opened in its place.

use crate::error::{LookupError, StoreError};
use crate::store::{BoxedConnection, ConnectionManager, RegistryConnection};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Shared handle to the pool. Cloning is cheap.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    manager: Arc<dyn ConnectionManager>,
    idle: Mutex<Vec<BoxedConnection>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    checkout_timeout: Duration,
    checked_out: AtomicUsize,
    discarded: AtomicUsize,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub capacity: usize,
    pub idle: usize,
    pub checked_out: usize,
    /// Connections dropped after failing a liveness check
    pub discarded: usize,
}

impl ConnectionPool {
    /// Open `capacity` connections up front.
    ///
    /// # Errors
    ///
    /// Fails with the first connection error; no partially filled pool is returned.
    pub async fn connect(
        manager: Arc<dyn ConnectionManager>,
        capacity: usize,
        checkout_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let mut idle = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            idle.push(manager.connect().await?);
        }

        info!(capacity, "database connection pool ready");

        Ok(Self {
            inner: Arc::new(PoolInner {
                manager,
                idle: Mutex::new(idle),
                permits: Arc::new(Semaphore::new(capacity)),
                capacity,
                checkout_timeout,
                checked_out: AtomicUsize::new(0),
                discarded: AtomicUsize::new(0),
            }),
        })
    }

    /// Wait for a free connection.
    ///
    /// # Errors
    ///
    /// `PoolExhausted` when none frees up within the checkout timeout;
    /// `Database` when the pool is closed or an empty slot cannot be refilled.
    pub async fn checkout(&self) -> Result<PooledConnection, LookupError> {
        let started = Instant::now();
        let permits = Arc::clone(&self.inner.permits);

        let permit = match tokio::time::timeout(self.inner.checkout_timeout, permits.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StoreError::unavailable("connection pool is closed").into()),
            Err(_) => return Err(LookupError::pool_exhausted(started.elapsed())),
        };

        // A slot can be empty when an earlier replacement failed.
        let conn = match self.inner.take_idle() {
            Some(conn) => conn,
            None => self.inner.manager.connect().await?,
        };

        self.inner.checked_out.fetch_add(1, Ordering::SeqCst);
        Ok(PooledConnection {
            conn: Some(conn),
            permit: Some(permit),
            pool: Arc::clone(&self.inner),
            broken: false,
        })
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            capacity: self.inner.capacity,
            idle: self.inner.idle().len(),
            checked_out: self.inner.checked_out.load(Ordering::SeqCst),
            discarded: self.inner.discarded.load(Ordering::SeqCst),
        }
    }

    /// Refuse further checkouts and drop idle connections.
    pub fn close(&self) {
        self.inner.permits.close();
        self.inner.idle().clear();
        info!("database connection pool closed");
    }
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, Vec<BoxedConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_idle(&self) -> Option<BoxedConnection> {
        self.idle().pop()
    }

    fn put_idle(&self, conn: BoxedConnection) {
        if !self.permits.is_closed() {
            self.idle().push(conn);
        }
    }

    async fn check_in(&self, mut conn: BoxedConnection, broken: bool) {
        let healthy = !broken && self.manager.is_valid(conn.as_mut()).await;

        if healthy {
            self.put_idle(conn);
        } else {
            drop(conn);
            self.discarded.fetch_add(1, Ordering::SeqCst);
            warn!("discarding unhealthy database connection");
            match self.manager.connect().await {
                Ok(fresh) => self.put_idle(fresh),
                Err(e) => error!(error = %e, "failed to replace database connection"),
            }
        }

        self.checked_out.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A checked-out connection. Derefs to the session.
pub struct PooledConnection {
    conn: Option<BoxedConnection>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
    broken: bool,
}

impl PooledConnection {
    /// Flag the session as unusable so check-in discards it without a ping.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Check the connection back in and free the slot.
    ///
    /// The check-in runs on its own task, so it completes even when the
    /// caller is cancelled while the liveness check is in flight.
    pub async fn release(mut self) {
        if let Some(task) = self.spawn_check_in(&Handle::current()) {
            if let Err(e) = task.await {
                error!(error = %e, "connection check-in task failed");
            }
        }
    }

    fn spawn_check_in(&mut self, handle: &Handle) -> Option<JoinHandle<()>> {
        let conn = self.conn.take()?;
        // Permit goes last so a waiter finds the connection already idle.
        let permit = self.permit.take();
        let pool = Arc::clone(&self.pool);
        let broken = self.broken;

        Some(handle.spawn(async move {
            pool.check_in(conn, broken).await;
            drop(permit);
        }))
    }
}

impl Deref for PooledConnection {
    type Target = dyn RegistryConnection;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn.as_ref(),
            None => unreachable!("connection is present until release"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn.as_mut(),
            None => unreachable!("connection is present until release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.conn.is_none() {
            return;
        }

        if let Ok(handle) = Handle::try_current() {
            self.spawn_check_in(&handle);
            return;
        }

        // No runtime to ping on; trust the connection unless flagged.
        if let Some(conn) = self.conn.take() {
            if self.broken {
                self.pool.discarded.fetch_add(1, Ordering::SeqCst);
            } else {
                self.pool.put_idle(conn);
            }
            self.pool.checked_out.fetch_sub(1, Ordering::SeqCst);
        }
        self.permit.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRegistry;

    async fn pool_of(registry: &MemoryRegistry, size: usize) -> ConnectionPool {
        ConnectionPool::connect(Arc::new(registry.clone()), size, Duration::from_millis(100))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_connections_opened_eagerly() {
        let registry = MemoryRegistry::new();
        let pool = pool_of(&registry, 4).await;
        assert_eq!(registry.counts().connects, 4);
        assert_eq!(
            pool.status(),
            PoolStatus {
                capacity: 4,
                idle: 4,
                checked_out: 0,
                discarded: 0
            }
        );
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal() {
        let registry = MemoryRegistry::new();
        registry.fail_connects(true);
        let result =
            ConnectionPool::connect(Arc::new(registry), 2, Duration::from_millis(100)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_checkout_and_release() {
        let registry = MemoryRegistry::new();
        let pool = pool_of(&registry, 2).await;

        let mut conn = pool.checkout().await.unwrap();
        assert_eq!(pool.status().checked_out, 1);
        assert_eq!(pool.status().idle, 1);
        conn.ping().await.unwrap();

        conn.release().await;
        assert_eq!(pool.status().checked_out, 0);
        assert_eq!(pool.status().idle, 2);
    }

    #[tokio::test]
    async fn test_exhaustion_times_out() {
        let registry = MemoryRegistry::new();
        let pool = pool_of(&registry, 1).await;

        let held = pool.checkout().await.unwrap();
        let result = pool.checkout().await;
        assert!(matches!(result, Err(LookupError::PoolExhausted { .. })));

        held.release().await;
        assert!(pool.checkout().await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_gets_released_connection() {
        let registry = MemoryRegistry::new();
        let pool = ConnectionPool::connect(Arc::new(registry.clone()), 1, Duration::from_secs(2))
            .await
            .unwrap();

        let held = pool.checkout().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.checkout().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        held.release().await;

        let result = waiter.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unhealthy_connection_replaced() {
        let registry = MemoryRegistry::new();
        let pool = pool_of(&registry, 1).await;

        let conn = pool.checkout().await.unwrap();
        registry.fail_pings(true);
        conn.release().await;

        let status = pool.status();
        assert_eq!(status.discarded, 1);
        assert_eq!(status.idle, 1);
        assert_eq!(registry.counts().connects, 2);
    }

    #[tokio::test]
    async fn test_failed_replacement_refilled_on_checkout() {
        let registry = MemoryRegistry::new();
        let pool = pool_of(&registry, 1).await;

        let mut conn = pool.checkout().await.unwrap();
        conn.mark_broken();
        registry.fail_connects(true);
        conn.release().await;
        assert_eq!(pool.status().idle, 0);

        registry.fail_connects(false);
        let conn = pool.checkout().await.unwrap();
        conn.release().await;
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn test_dropped_guard_returns_connection() {
        let registry = MemoryRegistry::new();
        let pool = pool_of(&registry, 1).await;

        {
            let _conn = pool.checkout().await.unwrap();
        }

        // Check-in runs on a spawned task; the next checkout waits for its permit.
        let conn = pool.checkout().await.unwrap();
        conn.release().await;
        assert_eq!(pool.status().checked_out, 0);
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn test_cancelled_release_still_checks_in() {
        let registry = MemoryRegistry::new();
        let pool = pool_of(&registry, 2).await;

        let conn = pool.checkout().await.unwrap();
        registry.set_ping_delay(Duration::from_millis(200));
        let result = tokio::time::timeout(Duration::from_millis(10), conn.release()).await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        let status = pool.status();
        assert_eq!(status.checked_out, 0);
        assert_eq!(status.idle, 2);
        assert_eq!(status.discarded, 0);
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_checkout() {
        let registry = MemoryRegistry::new();
        let pool = pool_of(&registry, 1).await;
        pool.close();
        assert!(matches!(
            pool.checkout().await,
            Err(LookupError::Database(StoreError::Unavailable { .. }))
        ));
    }
}
