//! Serializable transaction execution with bounded conflict retry.
//!
//! Concurrent rotations for the same account must not interleave, so
//! every multi-step credential change runs under `SERIALIZABLE`
//! isolation. Serialization failures and deadlocks are transient by
//! nature; the whole unit is re-run up to a configured bound, and only
//! then does the `Conflict` surface to the caller.

use futures::future::BoxFuture;
use tracing::debug;

use crate::error::AuthError;
use crate::store::SessionConn;

/// Retry configuration for serializable transactions.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Exhausting the budget
    /// surfaces the conflict error itself.
    pub max_attempts: u32,
    /// Classifies an error as a transient write conflict. Kept as data
    /// so tests can widen or narrow the class.
    pub is_transient: fn(&AuthError) -> bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            is_transient: AuthError::is_conflict,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(16)
    }
}

/// Run `body` inside a serializable transaction on `conn`:
/// begin → body → commit, rollback on any error.
///
/// Transient conflicts (per the policy predicate) restart the whole
/// unit; any other error aborts immediately. The body must be safe to
/// re-run from scratch — it observes only transaction-local state.
pub async fn with_serializable_retry<C, T, F>(
    policy: &RetryPolicy,
    conn: &mut C,
    body: F,
) -> Result<T, AuthError>
where
    C: SessionConn,
    F: for<'c> Fn(&'c mut C) -> BoxFuture<'c, Result<T, AuthError>>,
{
    let mut attempt = 1;
    loop {
        conn.begin_serializable().await?;

        let outcome = match body(conn).await {
            Ok(value) => conn.commit().await.map(|()| value),
            Err(e) => {
                // Best effort: the transaction may already be aborted.
                let _ = conn.rollback().await;
                Err(e)
            }
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if (policy.is_transient)(&e) && attempt < policy.max_attempts => {
                debug!(attempt, "serializable conflict, retrying: {e}");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryBackend, MemoryConn};
    use crate::store::RotationState;

    fn conn_with_conflicts(backend: &MemoryBackend, conflicts: usize) -> MemoryConn {
        backend.set_commit_conflicts(conflicts);
        backend.connect_sync()
    }

    #[tokio::test]
    async fn test_commits_on_first_attempt() {
        let backend = MemoryBackend::with_account("u1", "hash");
        let mut conn = backend.connect_sync();

        let state = with_serializable_retry(&RetryPolicy::default(), &mut conn, |c| {
            Box::pin(async move { c.rotation_state("u1").await })
        })
        .await
        .unwrap();

        assert_eq!(state, Some(RotationState::revoked()));
    }

    #[tokio::test]
    async fn test_transient_conflicts_within_budget_succeed() {
        let backend = MemoryBackend::with_account("u1", "hash");
        let mut conn = conn_with_conflicts(&backend, 3);

        with_serializable_retry(&RetryPolicy::new(5), &mut conn, |c| {
            Box::pin(async move {
                c.put_rotation_state("u1", &RotationState::active("t", "f"))
                    .await
            })
        })
        .await
        .unwrap();

        // The winning attempt's write stuck.
        let mut check = backend.connect_sync();
        assert_eq!(
            check.rotation_state_sync("u1"),
            Some(RotationState::active("t", "f"))
        );
    }

    #[tokio::test]
    async fn test_budget_exhaustion_surfaces_conflict() {
        let backend = MemoryBackend::with_account("u1", "hash");
        let mut conn = conn_with_conflicts(&backend, 10);

        let err = with_serializable_retry(&RetryPolicy::new(3), &mut conn, |c| {
            Box::pin(async move {
                c.put_rotation_state("u1", &RotationState::active("t", "f"))
                    .await
            })
        })
        .await
        .unwrap_err();

        assert!(err.is_conflict());
        // Nothing committed.
        let mut check = backend.connect_sync();
        assert_eq!(
            check.rotation_state_sync("u1"),
            Some(RotationState::revoked())
        );
    }

    #[tokio::test]
    async fn test_non_transient_error_aborts_without_retry() {
        let backend = MemoryBackend::with_account("u1", "hash");
        let mut conn = backend.connect_sync();

        let attempts = std::sync::atomic::AtomicU32::new(0);
        let err = with_serializable_retry(&RetryPolicy::new(8), &mut conn, |c| {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Box::pin(async move { c.put_rotation_state("missing", &RotationState::revoked()).await })
        })
        .await
        .unwrap_err();

        assert!(matches!(err, AuthError::NotFound(_)));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
