//! Idempotency store (spec §3 `IdempotencyRecord`, §4.I algorithm, §5
//! "at-most-one upstream submission").
//!
//! Two tables, as the spec describes: a persistent one (`rusqlite`, behind
//! `spawn_blocking` since connections aren't `Send`-across-await-friendly)
//! that short-circuits retries even across a gateway restart, and an
//! in-memory "in-flight" map that gives every concurrent caller sharing a
//! `(task_id, idempotency_key)` the same owner's single upstream
//! submission instead of each racing to submit their own.

use relay_protocol::{IdempotencyKey, Response};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use crate::error::GatewayError;

/// What an in-flight submission resolves to: the owner's eventual success
/// or the error it failed with. `None` means "still running".
type InFlightSlot = Option<Result<Response, GatewayError>>;

pub struct IdempotencyStore {
    conn: Arc<StdMutex<rusqlite::Connection>>,
    in_flight: Mutex<HashMap<IdempotencyKey, watch::Receiver<InFlightSlot>>>,
}

impl IdempotencyStore {
    pub fn open(path: &std::path::Path) -> Result<Self, GatewayError> {
        let conn = rusqlite::Connection::open(path).map_err(|e| {
            tracing::error!(error = %e, path = %path.display(), "failed to open idempotency store");
            GatewayError::Internal
        })?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS action_idempotency (
                task_id TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                response_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (task_id, idempotency_key)
            );
            CREATE INDEX IF NOT EXISTS idx_action_idempotency_created_at
                ON action_idempotency(created_at);",
        )
        .map_err(|e| {
            tracing::error!(error = %e, "failed to initialise idempotency schema");
            GatewayError::Internal
        })?;

        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Look up a previously-completed response for `key`, if any.
    async fn lookup_persistent(&self, key: &IdempotencyKey) -> Option<Response> {
        let conn = self.conn.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.query_row(
                "SELECT response_json FROM action_idempotency WHERE task_id = ?1 AND idempotency_key = ?2",
                rusqlite::params![key.task_id, key.idempotency_key],
                |row| row.get::<_, String>(0),
            )
            .ok()
        })
        .await
        .ok()
        .flatten()
        .and_then(|json| serde_json::from_str(&json).ok())
    }

    /// Persist a completed response. Best-effort per spec §4.I step 5 — a
    /// write failure is logged but never surfaced to the caller, whose
    /// response has already been decided.
    async fn store_persistent(&self, key: &IdempotencyKey, response: &Response) {
        let conn = self.conn.clone();
        let key = key.clone();
        let Ok(json) = serde_json::to_string(response) else {
            tracing::error!("failed to serialise idempotency response, not persisting");
            return;
        };
        let now = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        let result = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT OR REPLACE INTO action_idempotency (task_id, idempotency_key, response_json, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![key.task_id, key.idempotency_key, json, now],
            )
        })
        .await;
        if let Ok(Err(e)) = result {
            tracing::error!(error = %e, "failed to persist idempotency record");
        }
    }

    /// Delete persisted records older than `retention`. Run periodically
    /// by [`Self::spawn_cleanup_task`].
    async fn cleanup_older_than(&self, retention: Duration) {
        let conn = self.conn.clone();
        let cutoff = time::OffsetDateTime::now_utc() - retention;
        let Ok(cutoff) = cutoff.format(&time::format_description::well_known::Rfc3339) else {
            return;
        };
        let result = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "DELETE FROM action_idempotency WHERE created_at < ?1",
                rusqlite::params![cutoff],
            )
        })
        .await;
        match result {
            Ok(Ok(removed)) if removed > 0 => {
                tracing::info!(removed, "cleaned up expired idempotency records");
            }
            Ok(Err(e)) => tracing::error!(error = %e, "idempotency cleanup query failed"),
            _ => {}
        }
    }

    /// Spawn the background retention sweep; runs once per `retention`/4
    /// (capped to an hour) so the table doesn't grow unbounded between
    /// restarts.
    pub fn spawn_cleanup_task(self: &Arc<Self>, retention: Duration) {
        let store = self.clone();
        let interval = (retention / 4).min(Duration::from_secs(3600)).max(Duration::from_secs(60));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.cleanup_older_than(retention).await;
            }
        });
    }

    /// Run `submit` for `key`, deduplicating concurrent and retried
    /// callers (spec §4.I, invariant 5 "at-most-one upstream submission").
    ///
    /// Returns `(response, was_replay)`. `was_replay` is true whenever the
    /// response did not come from this call's own submission — either a
    /// persisted hit or an in-flight follower join.
    pub async fn submit<F, Fut>(
        &self,
        key: IdempotencyKey,
        submit: F,
    ) -> Result<(Response, bool), GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Response, GatewayError>>,
    {
        if let Some(cached) = self.lookup_persistent(&key).await {
            return Ok((cached, true));
        }

        let mut guard = self.in_flight.lock().await;
        if let Some(rx) = guard.get(&key).cloned() {
            drop(guard);
            return self.await_in_flight(rx).await.map(|r| (r, true));
        }

        let (tx, rx) = watch::channel(None);
        guard.insert(key.clone(), rx);
        drop(guard);

        let result = submit().await;

        match &result {
            Ok(response) => {
                self.store_persistent(&key, response).await;
                let _ = tx.send(Some(Ok(response.clone())));
            }
            Err(e) => {
                // Not persisted: a later retry must be free to re-dispatch
                // (spec §5 cancellation: "the persistent record is *not*
                // written for an errored submission").
                let _ = tx.send(Some(Err(e.clone())));
            }
        }

        self.in_flight.lock().await.remove(&key);
        result.map(|r| (r, false))
    }

    async fn await_in_flight(
        &self,
        mut rx: watch::Receiver<InFlightSlot>,
    ) -> Result<Response, GatewayError> {
        if rx.wait_for(|slot| slot.is_some()).await.is_err() {
            // The owner's sender was dropped without ever sending — treat
            // the same as an upstream disconnect rather than panicking.
            return Err(GatewayError::AgentDisconnected);
        }
        rx.borrow().clone().expect("checked Some above")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::{ActionResult, ResponseStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn ok_response() -> Response {
        Response {
            request_id: Uuid::new_v4(),
            status: ResponseStatus::Success,
            action: "git_status".to_string(),
            result: Some(ActionResult::new(0, "clean", "")),
            error: None,
            idempotent_replay: false,
        }
    }

    #[tokio::test]
    async fn first_submission_executes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdempotencyStore::open(&dir.path().join("idem.sqlite3")).unwrap();
        let key = IdempotencyKey::new("t1", "k1");

        let (response, replay) = store
            .submit(key.clone(), || async { Ok(ok_response()) })
            .await
            .unwrap();
        assert!(!replay);
        assert_eq!(response.status, ResponseStatus::Success);

        let (response2, replay2) = store
            .submit(key, || async { panic!("must not re-submit") })
            .await
            .unwrap();
        assert!(replay2);
        assert_eq!(response2.request_id, response.request_id);
    }

    #[tokio::test]
    async fn concurrent_callers_share_a_single_submission() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(IdempotencyStore::open(&dir.path().join("idem.sqlite3")).unwrap());
        let key = IdempotencyKey::new("t1", "k1");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let store = store.clone();
            let key = key.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                store
                    .submit(key, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(ok_response())
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut request_ids = Vec::new();
        for handle in handles {
            let (response, _) = handle.await.unwrap();
            request_ids.push(response.request_id);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1, "only one owner should submit");
        assert!(request_ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn failed_submission_is_not_persisted_and_frees_the_key_for_retry() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdempotencyStore::open(&dir.path().join("idem.sqlite3")).unwrap();
        let key = IdempotencyKey::new("t1", "k1");

        let first = store
            .submit(key.clone(), || async { Err(GatewayError::AgentDisconnected) })
            .await;
        assert!(first.is_err());

        let (response, replay) = store
            .submit(key, || async { Ok(ok_response()) })
            .await
            .unwrap();
        assert!(!replay, "a failed submission must not be cached");
        assert_eq!(response.status, ResponseStatus::Success);
    }
}
