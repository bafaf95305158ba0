//! Bounded pool of long-lived, validatable connections.
//!
//! The pool owns every connection it creates. Callers borrow one with
//! [`ResourcePool::acquire`] and hand it back exactly once with
//! [`ResourcePool::release`], or use [`ResourcePool::get`] for a guard that
//! releases on drop.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("Pool exhausted: all {max_size} connections are on loan")]
    PoolExhausted { max_size: usize },

    #[error("Pool is closed")]
    PoolClosed,

    #[error("Connection {0} is not on loan from this pool")]
    NotOnLoan(u64),

    #[error("Failed to create connection: {0}")]
    Connect(String),

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Creates, validates and closes the connections a pool hands out
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a fresh connection. Failures are returned to the acquiring caller as-is.
    async fn connect(&self) -> Result<Self::Connection, PoolError>;

    /// Answer whether an idle connection is still usable
    async fn is_valid(&self, conn: &mut Self::Connection) -> bool;

    /// Best-effort close
    async fn close(&self, conn: Self::Connection);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections opened eagerly when the pool is built
    pub initial_size: usize,
    /// Hard ceiling on connections that exist at the same time
    pub max_size: usize,
    /// `None` fails fast when the ceiling is reached; `Some` waits at most this long
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 5,
            max_size: 20,
            acquire_timeout: None,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::InvalidConfig(
                "max_size must be greater than 0".to_string(),
            ));
        }
        if self.initial_size > self.max_size {
            return Err(PoolError::InvalidConfig(format!(
                "initial_size ({}) must not exceed max_size ({})",
                self.initial_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// Point-in-time view of the pool's two sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub idle: usize,
    pub on_loan: usize,
    pub max_size: usize,
    pub closed: bool,
}

impl PoolStatus {
    pub fn total(&self) -> usize {
        self.idle + self.on_loan
    }
}

/// A connection on loan. Must go back through [`ResourcePool::release`];
/// dropping it without releasing permanently removes its slot from the pool.
#[derive(Debug)]
pub struct PooledResource<C> {
    id: u64,
    pool_id: u64,
    conn: C,
}

impl<C> PooledResource<C> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<C> Deref for PooledResource<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for PooledResource<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

struct IdleConnection<C> {
    id: u64,
    conn: C,
}

struct PoolState<C> {
    idle: Vec<IdleConnection<C>>,
    // Also holds ids of connections still being opened, so they count against max_size.
    on_loan: HashSet<u64>,
    closed: bool,
}

impl<C> PoolState<C> {
    fn total(&self) -> usize {
        self.idle.len() + self.on_loan.len()
    }
}

enum Checkout<C> {
    Idle(u64, C),
    Create(u64),
    Exhausted,
}

struct PoolInner<M: ConnectionManager> {
    id: u64,
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Connection>>,
    next_conn_id: AtomicU64,
    released: Notify,
}

/// Owned connection pool. Cloning shares the same pool.
pub struct ResourcePool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> Clone for ResourcePool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ConnectionManager> ResourcePool<M> {
    /// Build the pool and open `initial_size` connections up front
    pub async fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let mut idle = Vec::with_capacity(config.max_size);
        for id in 1..=config.initial_size as u64 {
            match manager.connect().await {
                Ok(conn) => idle.push(IdleConnection { id, conn }),
                Err(e) => {
                    for opened in idle {
                        manager.close(opened.conn).await;
                    }
                    return Err(e);
                }
            }
        }

        let pool_id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            "Connection pool {} initialized with {} connections (max {})",
            pool_id, config.initial_size, config.max_size
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                id: pool_id,
                next_conn_id: AtomicU64::new(config.initial_size as u64 + 1),
                manager,
                config,
                state: Mutex::new(PoolState {
                    idle,
                    on_loan: HashSet::new(),
                    closed: false,
                }),
                released: Notify::new(),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.lock();
        PoolStatus {
            idle: state.idle.len(),
            on_loan: state.on_loan.len(),
            max_size: self.inner.config.max_size,
            closed: state.closed,
        }
    }

    /// Borrow a connection for exclusive use.
    ///
    /// Idle connections are validated first; a stale one is closed and
    /// replaced in the same slot. When the ceiling is reached the call fails
    /// with `PoolExhausted`, after waiting up to `acquire_timeout` if one is set.
    pub async fn acquire(&self) -> Result<PooledResource<M::Connection>, PoolError> {
        let deadline = self.inner.config.acquire_timeout.map(|t| Instant::now() + t);

        loop {
            match self.checkout()? {
                Checkout::Idle(id, conn) => {
                    return self.validate_or_replace(self.slot(id), conn).await
                }
                Checkout::Create(id) => return self.open_on_loan(self.slot(id)).await,
                Checkout::Exhausted => {
                    let exhausted = PoolError::PoolExhausted {
                        max_size: self.inner.config.max_size,
                    };
                    let Some(deadline) = deadline else {
                        debug!("Pool {} exhausted, failing fast", self.inner.id);
                        return Err(exhausted);
                    };
                    let waited =
                        tokio::time::timeout_at(deadline, self.inner.released.notified()).await;
                    if waited.is_err() {
                        if self.lock().closed {
                            return Err(PoolError::PoolClosed);
                        }
                        debug!("Pool {} exhausted after waiting", self.inner.id);
                        return Err(exhausted);
                    }
                }
            }
        }
    }

    /// Borrow a connection wrapped in a guard that releases it on drop
    pub async fn get(&self) -> Result<PooledConnection<M>, PoolError> {
        let resource = self.acquire().await?;
        Ok(PooledConnection {
            pool: self.clone(),
            resource: Some(resource),
        })
    }

    /// Return a borrowed connection to the idle set.
    ///
    /// Rejects connections that this pool instance does not currently have on
    /// loan. A rejected connection is dropped, never reinserted. After
    /// shutdown the connection is closed in the background.
    pub fn release(&self, resource: PooledResource<M::Connection>) -> Result<(), PoolError> {
        if resource.pool_id != self.inner.id {
            warn!(
                "Rejected release of connection {} owned by pool {}",
                resource.id, resource.pool_id
            );
            return Err(PoolError::NotOnLoan(resource.id));
        }

        let mut state = self.lock();
        if state.closed {
            drop(state);
            self.close_detached(resource.conn);
            return Err(PoolError::PoolClosed);
        }
        if !state.on_loan.remove(&resource.id) {
            warn!("Rejected release of connection {} not on loan", resource.id);
            return Err(PoolError::NotOnLoan(resource.id));
        }
        state.idle.push(IdleConnection {
            id: resource.id,
            conn: resource.conn,
        });
        debug!(
            "Connection {} returned to pool. Available: {}, Used: {}",
            resource.id,
            state.idle.len(),
            state.on_loan.len()
        );
        drop(state);

        self.inner.released.notify_one();
        Ok(())
    }

    /// Close every idle connection and refuse further acquisitions.
    ///
    /// Connections still on loan are dropped when they come back.
    pub async fn shutdown(&self) {
        let idle = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.on_loan.clear();
            std::mem::take(&mut state.idle)
        };

        self.inner.released.notify_waiters();

        let closed = idle.len();
        for entry in idle {
            self.inner.manager.close(entry.conn).await;
        }
        info!("Connection pool {} shut down, closed {} idle connections", self.inner.id, closed);
    }

    /// Close a connection without blocking the caller. Outside a runtime the
    /// connection is just dropped.
    fn close_detached(&self, conn: M::Connection) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move { inner.manager.close(conn).await });
            }
            Err(_) => debug!("No runtime to close returned connection, dropping it"),
        }
    }

    fn slot(&self, id: u64) -> Slot<'_, M> {
        Slot {
            pool: self,
            id,
            armed: true,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<M::Connection>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn checkout(&self) -> Result<Checkout<M::Connection>, PoolError> {
        let mut state = self.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }

        if let Some(entry) = state.idle.pop() {
            state.on_loan.insert(entry.id);
            return Ok(Checkout::Idle(entry.id, entry.conn));
        }

        if state.total() < self.inner.config.max_size {
            let id = self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
            state.on_loan.insert(id);
            return Ok(Checkout::Create(id));
        }

        Ok(Checkout::Exhausted)
    }

    async fn validate_or_replace(
        &self,
        slot: Slot<'_, M>,
        mut conn: M::Connection,
    ) -> Result<PooledResource<M::Connection>, PoolError> {
        if self.inner.manager.is_valid(&mut conn).await {
            return self.hand_out(slot, conn).await;
        }

        debug!("Connection {} failed validation, replacing it", slot.id);
        self.inner.manager.close(conn).await;
        self.open_on_loan(slot).await
    }

    async fn open_on_loan(&self, slot: Slot<'_, M>) -> Result<PooledResource<M::Connection>, PoolError> {
        match self.inner.manager.connect().await {
            Ok(conn) => self.hand_out(slot, conn).await,
            Err(e) => {
                warn!("Failed to open connection for pool {}: {}", self.inner.id, e);
                Err(e)
            }
        }
    }

    async fn hand_out(
        &self,
        mut slot: Slot<'_, M>,
        conn: M::Connection,
    ) -> Result<PooledResource<M::Connection>, PoolError> {
        // Shutdown may have run while this connection was being validated or opened.
        let still_tracked = {
            let state = self.lock();
            !state.closed && state.on_loan.contains(&slot.id)
        };
        if !still_tracked {
            self.inner.manager.close(conn).await;
            return Err(PoolError::PoolClosed);
        }

        slot.armed = false;
        Ok(PooledResource {
            id: slot.id,
            pool_id: self.inner.id,
            conn,
        })
    }
}

/// Reserved slot between checkout and hand-out. Frees the slot on drop unless
/// the connection was handed out, so an abandoned `acquire` never leaks it.
struct Slot<'a, M: ConnectionManager> {
    pool: &'a ResourcePool<M>,
    id: u64,
    armed: bool,
}

impl<M: ConnectionManager> Drop for Slot<'_, M> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.pool.lock().on_loan.remove(&self.id);
        self.pool.inner.released.notify_one();
    }
}

/// Guard returned by [`ResourcePool::get`]
pub struct PooledConnection<M: ConnectionManager> {
    pool: ResourcePool<M>,
    resource: Option<PooledResource<M::Connection>>,
}

impl<M: ConnectionManager> PooledConnection<M> {
    pub fn id(&self) -> u64 {
        self.resource.as_ref().map(|r| r.id).unwrap_or_default()
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &M::Connection {
        match &self.resource {
            Some(resource) => &resource.conn,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut M::Connection {
        match &mut self.resource {
            Some(resource) => &mut resource.conn,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            if let Err(e) = self.pool.release(resource) {
                debug!("Pooled connection not returned: {}", e);
            }
        }
    }
}
