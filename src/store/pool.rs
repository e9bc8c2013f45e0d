//! Bounded database connection pool.
//!
//! Connections live in exactly one of two disjoint sets, `idle` or
//! `active`, under a single async mutex. `acquire` hands out exclusive
//! leases, growing the pool up to a hard cap and otherwise blocking on
//! a [`Notify`] until a lease is released or the deadline passes.
//! Constructed once at startup and shared by handle; there is no global
//! pool state.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout_at, Instant};
use tracing::warn;

use crate::error::AuthError;
use crate::store::ConnectionManager;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections opened eagerly at startup.
    pub initial_size: usize,
    /// Hard cap on live connections; never exceeded.
    pub max_size: usize,
    /// How long `acquire` may wait before failing with `PoolTimeout`.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 5,
            max_size: 20,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Counts reported by [`Pool::status`].
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PoolStatus {
    pub idle: usize,
    pub active: usize,
    pub max: usize,
}

/// A leased connection. Exclusively owned by one caller between
/// `acquire` and `release`.
pub struct PooledConn<C> {
    id: u64,
    pub conn: C,
}

impl<C> PooledConn<C> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct PoolState<C> {
    idle: VecDeque<PooledConn<C>>,
    /// Ids of leased connections. A connection is in exactly one of
    /// `idle`/`active`, or in neither while being (re)constructed —
    /// those hold a slot via `total`.
    active: HashSet<u64>,
    /// idle + active + mid-construction. Never exceeds `max_size`.
    total: usize,
}

pub struct Pool<M: ConnectionManager> {
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Connection>>,
    idle_available: Notify,
    next_id: AtomicU64,
}

enum Plan<C> {
    Reuse(PooledConn<C>),
    Grow,
    Wait,
}

impl<M: ConnectionManager> Pool<M> {
    /// Create the pool and perform the initial fill.
    pub async fn new(manager: M, config: PoolConfig) -> Result<Self, AuthError> {
        if config.max_size == 0 || config.initial_size > config.max_size {
            return Err(AuthError::Internal(format!(
                "invalid pool config: initial {} / max {}",
                config.initial_size, config.max_size
            )));
        }

        let pool = Self {
            manager,
            config,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                active: HashSet::new(),
                total: 0,
            }),
            idle_available: Notify::new(),
            next_id: AtomicU64::new(1),
        };

        for _ in 0..pool.config.initial_size {
            let conn = pool.open().await?;
            let mut state = pool.state.lock().await;
            state.idle.push_back(conn);
            state.total += 1;
        }

        Ok(pool)
    }

    async fn open(&self) -> Result<PooledConn<M::Connection>, AuthError> {
        let conn = self.manager.connect().await?;
        Ok(PooledConn {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            conn,
        })
    }

    /// Lease a connection, waiting up to the configured timeout.
    ///
    /// Reused idle connections are liveness-checked first; a broken one
    /// is discarded and replaced with a fresh connection rather than
    /// handed back out. `PoolTimeout` is fatal to the caller's current
    /// operation — the pool never retries on its own.
    pub async fn acquire(&self) -> Result<PooledConn<M::Connection>, AuthError> {
        let deadline = Instant::now() + self.config.acquire_timeout;

        loop {
            let plan = {
                let mut state = self.state.lock().await;
                if let Some(conn) = state.idle.pop_front() {
                    state.active.insert(conn.id);
                    Plan::Reuse(conn)
                } else if state.total < self.config.max_size {
                    // Reserve the slot now; connect without the lock held.
                    state.total += 1;
                    Plan::Grow
                } else {
                    Plan::Wait
                }
            };

            match plan {
                Plan::Reuse(mut leased) => {
                    if self.manager.ping(&mut leased.conn).await.is_ok() {
                        return Ok(leased);
                    }
                    warn!(conn = leased.id, "discarding broken idle connection");
                    return self.replace(leased.id).await;
                }
                Plan::Grow => match self.open().await {
                    Ok(conn) => {
                        let mut state = self.state.lock().await;
                        state.active.insert(conn.id);
                        return Ok(conn);
                    }
                    Err(e) => {
                        self.forfeit_slot().await;
                        return Err(e);
                    }
                },
                Plan::Wait => {
                    if timeout_at(deadline, self.idle_available.notified())
                        .await
                        .is_err()
                    {
                        return Err(AuthError::PoolTimeout);
                    }
                    // Woken: re-contend for the idle set.
                }
            }
        }
    }

    /// Replace a broken connection whose slot is already reserved in
    /// `active` under `broken_id`.
    async fn replace(&self, broken_id: u64) -> Result<PooledConn<M::Connection>, AuthError> {
        match self.open().await {
            Ok(fresh) => {
                let mut state = self.state.lock().await;
                state.active.remove(&broken_id);
                state.active.insert(fresh.id);
                Ok(fresh)
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                state.active.remove(&broken_id);
                state.total -= 1;
                drop(state);
                // A slot opened up; let a waiter grow into it.
                self.idle_available.notify_one();
                Err(e)
            }
        }
    }

    async fn forfeit_slot(&self) {
        let mut state = self.state.lock().await;
        state.total -= 1;
        drop(state);
        self.idle_available.notify_one();
    }

    /// Return a leased connection to the idle set.
    ///
    /// Idempotent: releasing a connection the pool does not record as
    /// active (double release, foreign connection) is a silent no-op and
    /// the connection is dropped.
    pub async fn release(&self, conn: PooledConn<M::Connection>) {
        let mut state = self.state.lock().await;
        if state.active.remove(&conn.id) {
            state.idle.push_back(conn);
            drop(state);
            self.idle_available.notify_one();
        }
    }

    /// Drop a leased connection instead of returning it, e.g. after a
    /// fatal protocol error left it in an unknown transaction state.
    pub async fn discard(&self, conn: PooledConn<M::Connection>) {
        let mut state = self.state.lock().await;
        if state.active.remove(&conn.id) {
            state.total -= 1;
            drop(state);
            drop(conn);
            self.idle_available.notify_one();
        }
    }

    pub async fn status(&self) -> PoolStatus {
        let state = self.state.lock().await;
        PoolStatus {
            idle: state.idle.len(),
            active: state.active.len(),
            max: self.config.max_size,
        }
    }
}
