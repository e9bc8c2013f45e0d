//! In-memory store backend for tests.
//!
//! Mirrors the Postgres backend's contract closely enough to exercise
//! the pool, the retry combinator, and the rotation protocol without a
//! database: writes buffer in a per-connection overlay until commit, and
//! commits conflict (like a serialization failure) when a row read in
//! the transaction was committed past in the meantime. Failure-injection
//! knobs cover broken pings and forced transient conflicts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::AuthError;
use crate::store::{ConnectionManager, RotationState, SessionConn};

#[derive(Clone)]
struct AccountRow {
    version: u64,
    password_hash: String,
    state: RotationState,
}

#[derive(Default)]
struct Inner {
    accounts: Mutex<HashMap<String, AccountRow>>,
    /// Upcoming commits forced to fail with a transient conflict.
    commit_conflicts: AtomicUsize,
    /// Upcoming pings forced to fail.
    failing_pings: AtomicUsize,
}

/// Shared-state handle; clones refer to the same store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(user_id: &str, password_hash: &str) -> Self {
        let backend = Self::new();
        backend.insert_account(user_id, password_hash);
        backend
    }

    pub fn insert_account(&self, user_id: &str, password_hash: &str) {
        self.inner.accounts.lock().unwrap().insert(
            user_id.to_string(),
            AccountRow {
                version: 1,
                password_hash: password_hash.to_string(),
                state: RotationState::revoked(),
            },
        );
    }

    /// Force the next `n` commits (across all connections) to fail as
    /// transient conflicts.
    pub fn set_commit_conflicts(&self, n: usize) {
        self.inner.commit_conflicts.store(n, Ordering::SeqCst);
    }

    /// Force the next `n` pings to fail.
    pub fn set_failing_pings(&self, n: usize) {
        self.inner.failing_pings.store(n, Ordering::SeqCst);
    }

    pub fn connect_sync(&self) -> MemoryConn {
        MemoryConn {
            backend: self.clone(),
            in_tx: false,
            overlay: HashMap::new(),
            read_versions: HashMap::new(),
        }
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        let remaining = counter.load(Ordering::SeqCst);
        if remaining > 0 {
            counter.store(remaining - 1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

pub struct MemoryConn {
    backend: MemoryBackend,
    in_tx: bool,
    overlay: HashMap<String, AccountRow>,
    /// Versions of rows read in the current transaction; checked at
    /// commit to emulate serializable first-committer-wins.
    read_versions: HashMap<String, u64>,
}

impl MemoryConn {
    fn reset_tx(&mut self) {
        self.in_tx = false;
        self.overlay.clear();
        self.read_versions.clear();
    }

    fn load(&mut self, user_id: &str) -> Option<AccountRow> {
        if let Some(row) = self.overlay.get(user_id) {
            return Some(row.clone());
        }
        let accounts = self.backend.inner.accounts.lock().unwrap();
        let row = accounts.get(user_id).cloned();
        if self.in_tx {
            self.read_versions
                .entry(user_id.to_string())
                .or_insert_with(|| row.as_ref().map(|r| r.version).unwrap_or(0));
        }
        row
    }

    fn store(&mut self, user_id: &str, row: AccountRow) {
        self.overlay.insert(user_id.to_string(), row);
    }

    /// Committed rotation state, bypassing any open transaction.
    pub fn rotation_state_sync(&mut self, user_id: &str) -> Option<RotationState> {
        let accounts = self.backend.inner.accounts.lock().unwrap();
        accounts.get(user_id).map(|r| r.state.clone())
    }
}

#[async_trait]
impl SessionConn for MemoryConn {
    async fn begin_serializable(&mut self) -> Result<(), AuthError> {
        self.reset_tx();
        self.in_tx = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), AuthError> {
        if MemoryBackend::take_one(&self.backend.inner.commit_conflicts) {
            self.reset_tx();
            return Err(AuthError::Conflict("injected serialization failure".into()));
        }

        let overlay = std::mem::take(&mut self.overlay);
        let read_versions = std::mem::take(&mut self.read_versions);
        self.in_tx = false;

        let mut accounts = self.backend.inner.accounts.lock().unwrap();
        for (user_id, version) in &read_versions {
            let current = accounts.get(user_id).map(|r| r.version).unwrap_or(0);
            if current != *version {
                return Err(AuthError::Conflict(format!(
                    "could not serialize access to account {user_id}"
                )));
            }
        }
        for (user_id, mut row) in overlay {
            row.version += 1;
            accounts.insert(user_id, row);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), AuthError> {
        self.reset_tx();
        Ok(())
    }

    async fn rotation_state(&mut self, user_id: &str) -> Result<Option<RotationState>, AuthError> {
        Ok(self.load(user_id).map(|r| r.state))
    }

    async fn put_rotation_state(
        &mut self,
        user_id: &str,
        state: &RotationState,
    ) -> Result<(), AuthError> {
        let mut row = self
            .load(user_id)
            .ok_or_else(|| AuthError::NotFound("account".into()))?;
        row.state = state.clone();
        self.store(user_id, row);
        Ok(())
    }

    async fn password_hash(&mut self, user_id: &str) -> Result<Option<String>, AuthError> {
        Ok(self.load(user_id).map(|r| r.password_hash))
    }

    async fn put_password_hash(&mut self, user_id: &str, hash: &str) -> Result<(), AuthError> {
        let mut row = self
            .load(user_id)
            .ok_or_else(|| AuthError::NotFound("account".into()))?;
        row.password_hash = hash.to_string();
        self.store(user_id, row);
        Ok(())
    }
}

#[async_trait]
impl ConnectionManager for MemoryBackend {
    type Connection = MemoryConn;

    async fn connect(&self) -> Result<MemoryConn, AuthError> {
        Ok(self.connect_sync())
    }

    async fn ping(&self, _conn: &mut MemoryConn) -> Result<(), AuthError> {
        if MemoryBackend::take_one(&self.inner.failing_pings) {
            return Err(AuthError::Database("connection reset".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let backend = MemoryBackend::with_account("u1", "h");
        let mut conn = backend.connect_sync();

        conn.begin_serializable().await.unwrap();
        conn.put_rotation_state("u1", &RotationState::active("t", "f"))
            .await
            .unwrap();
        conn.rollback().await.unwrap();

        assert_eq!(
            conn.rotation_state_sync("u1"),
            Some(RotationState::revoked())
        );
    }

    #[tokio::test]
    async fn test_stale_read_conflicts_at_commit() {
        let backend = MemoryBackend::with_account("u1", "h");
        let mut a = backend.connect_sync();
        let mut b = backend.connect_sync();

        a.begin_serializable().await.unwrap();
        let _ = a.rotation_state("u1").await.unwrap();

        // b commits an update to the row a has read.
        b.begin_serializable().await.unwrap();
        b.put_rotation_state("u1", &RotationState::active("t1", "f1"))
            .await
            .unwrap();
        b.commit().await.unwrap();

        a.put_rotation_state("u1", &RotationState::active("t2", "f2"))
            .await
            .unwrap();
        let err = a.commit().await.unwrap_err();
        assert!(err.is_conflict());

        // b's write won.
        assert_eq!(
            a.rotation_state_sync("u1"),
            Some(RotationState::active("t1", "f1"))
        );
    }
}
