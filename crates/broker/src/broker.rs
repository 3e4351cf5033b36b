//! `RunBroker`: the only place run lifecycle state, event ordering, and
//! fan-out live. Everything else — the coordinator loop, the channel
//! pipeline, the HTTP layer — talks to it instead of touching a run's
//! internals directly.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rb_domain::config::BrokerConfig;
use rb_domain::envelope::{Envelope, EventPayload};
use rb_domain::error::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::run::{IdempotencyEntry, RunEntry, RunParams, RunSnapshot, RunState};

struct Inner {
    entries: Mutex<HashMap<Uuid, Arc<Mutex<RunEntry>>>>,
    idempotency: Mutex<HashMap<String, IdempotencyEntry>>,
    config: BrokerConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct RunBroker(Arc<Inner>);

/// Handed to a started run's worker closure so it can admit events without
/// holding a reference to the broker's internals.
#[derive(Clone)]
pub struct RunEmitter {
    broker: RunBroker,
    run_id: Uuid,
}

impl RunEmitter {
    pub fn emit(&self, payload: EventPayload) -> Option<Envelope> {
        self.broker.emit(self.run_id, payload)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SubscriptionHandle {
    pub run_id: Uuid,
    subscriber_id: u64,
}

/// Result of a successful [`RunBroker::subscribe`] call.
pub struct Subscription {
    pub snapshot: RunSnapshot,
    pub replayed: Vec<Envelope>,
    pub receiver: UnboundedReceiver<Envelope>,
    pub handle: SubscriptionHandle,
    /// Set when `cursor` pointed past events the ring had already evicted.
    pub lagged: bool,
}

impl RunBroker {
    pub fn new(config: BrokerConfig) -> Self {
        let inner = Arc::new(Inner {
            entries: Mutex::new(HashMap::new()),
            idempotency: Mutex::new(HashMap::new()),
            config,
            sweeper: Mutex::new(None),
        });
        let handle = spawn_sweeper(inner.clone());
        *inner.sweeper.lock() = Some(handle);
        Self(inner)
    }

    fn entry(&self, run_id: Uuid) -> Option<Arc<Mutex<RunEntry>>> {
        self.0.entries.lock().get(&run_id).cloned()
    }

    pub fn entry_count(&self) -> usize {
        self.0.entries.lock().len()
    }

    /// Creates (or, for a fresh call within the idempotency window, returns
    /// the already-created) run. `create_fn` is the caller's hook for
    /// persisting the canonical row via the Persistence RPC; the broker
    /// only admits the in-memory entry after that call succeeds.
    pub async fn create_runtime_run<F, Fut>(
        &self,
        params: RunParams,
        idempotency_key: Option<String>,
        fingerprint: String,
        create_fn: F,
    ) -> Result<(Uuid, bool), Error>
    where
        F: FnOnce(Uuid) -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        let key = idempotency_key.map(|k| format!("{}:{}", params.workspace_id, k));
        let ttl = chrono::Duration::milliseconds(self.0.config.run_idempotency_ttl_ms as i64);

        if let Some(key) = &key {
            let mut table = self.0.idempotency.lock();
            if let Some(existing) = table.get(key) {
                if Utc::now() - existing.created_at < ttl {
                    if existing.fingerprint == fingerprint {
                        return Ok((existing.run_id, true));
                    }
                    return Err(Error::IdempotencyConflict(format!(
                        "idempotency key {key} was already used with a different request body"
                    )));
                }
                table.remove(key);
            }
        }

        let run_id = Uuid::new_v4();
        create_fn(run_id).await?;

        let entry = RunEntry::new(run_id, params, self.0.config.run_event_buffer_size);
        self.0.entries.lock().insert(run_id, Arc::new(Mutex::new(entry)));

        if let Some(key) = key {
            self.0.idempotency.lock().insert(key, IdempotencyEntry { run_id, fingerprint, created_at: Utc::now() });
        }

        Ok((run_id, false))
    }

    /// Starts the run's worker exactly once. `starter` receives the run's
    /// params and an emitter; its own return value decides the synthetic
    /// terminal pair the broker admits once it resolves — `Ok(())` yields
    /// `done` alone, `Err(message)` yields `error` then `done`. A worker
    /// that already admitted its own terminal event before returning is
    /// safe: `emit` is a no-op once a run is terminal.
    pub fn start_run<F, Fut>(&self, run_id: Uuid, starter: F) -> Result<(), Error>
    where
        F: FnOnce(RunParams, RunEmitter) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let entry_arc = self.entry(run_id).ok_or_else(|| Error::NotFound(format!("run {run_id}")))?;
        let params = {
            let mut guard = entry_arc.lock();
            if guard.state != RunState::Queued {
                return Err(Error::Validation(format!("run {run_id} has already been started")));
            }
            guard.state = RunState::Running;
            guard.params.clone()
        };

        let broker = self.clone();
        let emitter = RunEmitter { broker: broker.clone(), run_id };
        tokio::spawn(async move {
            match starter(params, emitter).await {
                Ok(()) => {
                    broker.emit(run_id, EventPayload::Done);
                }
                Err(message) => {
                    broker.emit(run_id, EventPayload::Error { message });
                    broker.emit(run_id, EventPayload::Done);
                }
            }
        });

        Ok(())
    }

    /// No-op once the run is terminal, per contract — a worker racing a
    /// concurrent `cancel` simply finds its late events swallowed.
    pub fn emit(&self, run_id: Uuid, payload: EventPayload) -> Option<Envelope> {
        let entry_arc = self.entry(run_id)?;
        let mut guard = entry_arc.lock();
        if guard.terminal {
            return None;
        }
        Some(guard.admit(payload))
    }

    /// Forces the run to `cancelled` and admits a synthetic error+done pair.
    /// Returns `false` if the run was already terminal (or unknown) —
    /// callers use this to distinguish "I cancelled it" from "it finished
    /// on its own first".
    pub fn cancel(&self, run_id: Uuid, reason: Option<String>) -> bool {
        let Some(entry_arc) = self.entry(run_id) else { return false };
        let mut guard = entry_arc.lock();
        if guard.terminal {
            return false;
        }
        guard.state = RunState::Cancelled;
        let message = reason.unwrap_or_else(|| "run cancelled".to_string());
        guard.admit(EventPayload::Error { message });
        guard.admit(EventPayload::Done);
        true
    }

    /// Registers a subscriber and replays every buffered event past
    /// `cursor` before returning, so a caller that passes the `lastEventId`
    /// of a dropped SSE connection never misses or duplicates an event.
    /// `lagged` is set when `cursor` pointed past events the ring has
    /// already evicted — the replay is still correct (it never invents
    /// events), but it's missing ones the caller expected to see.
    pub fn subscribe(&self, run_id: Uuid, cursor: u64) -> Option<Subscription> {
        let entry_arc = self.entry(run_id)?;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut guard = entry_arc.lock();
        let (subscriber_id, replayed, lagged) = guard.subscribe(cursor, tx);
        let snapshot = guard.snapshot();
        drop(guard);
        Some(Subscription { snapshot, replayed, receiver: rx, handle: SubscriptionHandle { run_id, subscriber_id }, lagged })
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        if let Some(entry_arc) = self.entry(handle.run_id) {
            entry_arc.lock().unsubscribe(handle.subscriber_id);
        }
    }

    pub fn get_snapshot(&self, run_id: Uuid) -> Option<RunSnapshot> {
        self.entry(run_id).map(|e| e.lock().snapshot())
    }

    pub fn close(&self) {
        if let Some(handle) = self.0.sweeper.lock().take() {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn sweep_now(&self) {
        sweep(&self.0);
    }
}

fn spawn_sweeper(inner: Arc<Inner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(inner.config.run_store_cleanup_interval_ms));
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            sweep(&inner);
        }
    })
}

fn sweep(inner: &Inner) {
    let now = Utc::now();

    let idempotency_ttl = chrono::Duration::milliseconds(inner.config.run_idempotency_ttl_ms as i64);
    inner.idempotency.lock().retain(|_, entry| now - entry.created_at < idempotency_ttl);

    let retention = chrono::Duration::milliseconds(inner.config.run_retention_ms as i64);
    let mut entries = inner.entries.lock();
    let before = entries.len();
    entries.retain(|_, entry_arc| {
        let guard = entry_arc.lock();
        !(guard.terminal && guard.subscriber_count() == 0 && now - guard.updated_at > retention)
    });
    let swept = before - entries.len();
    if swept > 0 {
        tracing::debug!(swept, "run broker sweep reclaimed idle terminal runs");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BrokerConfig {
        BrokerConfig {
            run_event_buffer_size: 100,
            run_retention_ms: 60_000,
            run_store_cleanup_interval_ms: 10_000,
            run_idempotency_ttl_ms: 10_000,
        }
    }

    fn params() -> RunParams {
        RunParams {
            session_id: "s1".into(),
            workspace_id: "ws1".into(),
            user_request: "hi".into(),
            coordinator_agent_id: "agent-a".into(),
            start_candidate_offset: None,
            resume_messages: None,
        }
    }

    #[tokio::test]
    async fn create_runtime_run_persists_before_admitting() {
        let broker = RunBroker::new(test_config());
        let (run_id, duplicate) =
            broker.create_runtime_run(params(), None, "fp1".into(), |_| async { Ok(()) }).await.unwrap();
        assert!(!duplicate);
        assert_eq!(broker.entry_count(), 1);
        assert_eq!(broker.get_snapshot(run_id).unwrap().state, RunState::Queued);
    }

    #[tokio::test]
    async fn create_fn_failure_prevents_entry_creation() {
        let broker = RunBroker::new(test_config());
        let result = broker
            .create_runtime_run(params(), None, "fp1".into(), |_| async {
                Err(Error::Upstream("persistence unreachable".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(broker.entry_count(), 0);
    }

    #[tokio::test]
    async fn repeated_idempotency_key_with_same_fingerprint_dedupes() {
        let broker = RunBroker::new(test_config());
        let (first, _) =
            broker.create_runtime_run(params(), Some("k1".into()), "fp1".into(), |_| async { Ok(()) }).await.unwrap();
        let (second, duplicate) =
            broker.create_runtime_run(params(), Some("k1".into()), "fp1".into(), |_| async { Ok(()) }).await.unwrap();
        assert!(duplicate);
        assert_eq!(first, second);
        assert_eq!(broker.entry_count(), 1);
    }

    #[tokio::test]
    async fn repeated_idempotency_key_with_different_fingerprint_conflicts() {
        let broker = RunBroker::new(test_config());
        broker.create_runtime_run(params(), Some("k1".into()), "fp1".into(), |_| async { Ok(()) }).await.unwrap();
        let result = broker.create_runtime_run(params(), Some("k1".into()), "fp2".into(), |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::IdempotencyConflict(_))));
    }

    #[tokio::test]
    async fn start_run_is_exactly_once() {
        let broker = RunBroker::new(test_config());
        let (run_id, _) =
            broker.create_runtime_run(params(), None, "fp1".into(), |_| async { Ok(()) }).await.unwrap();
        broker.start_run(run_id, |_params, _emitter| async { Ok(()) }).unwrap();
        let second = broker.start_run(run_id, |_params, _emitter| async { Ok(()) });
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn successful_worker_yields_done_without_error() {
        let broker = RunBroker::new(test_config());
        let (run_id, _) =
            broker.create_runtime_run(params(), None, "fp1".into(), |_| async { Ok(()) }).await.unwrap();
        let sub = broker.subscribe(run_id, 0).unwrap();
        let mut rx = sub.receiver;
        broker
            .start_run(run_id, |_params, emitter| async move {
                emitter.emit(EventPayload::MessageStart { message_id: "m1".into() });
                Ok(())
            })
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first.payload, EventPayload::MessageStart { .. }));
        let second = rx.recv().await.unwrap();
        assert!(second.payload.is_done());
        assert_eq!(broker.get_snapshot(run_id).unwrap().state, RunState::Completed);
    }

    #[tokio::test]
    async fn failing_worker_yields_error_then_done() {
        let broker = RunBroker::new(test_config());
        let (run_id, _) =
            broker.create_runtime_run(params(), None, "fp1".into(), |_| async { Ok(()) }).await.unwrap();
        let sub = broker.subscribe(run_id, 0).unwrap();
        let mut rx = sub.receiver;
        broker.start_run(run_id, |_params, _emitter| async move { Err("upstream exploded".to_string()) }).unwrap();

        let first = rx.recv().await.unwrap();
        assert!(first.payload.is_error());
        let second = rx.recv().await.unwrap();
        assert!(second.payload.is_done());
        assert_eq!(broker.get_snapshot(run_id).unwrap().state, RunState::Failed);
    }

    #[tokio::test]
    async fn cancel_marks_cancelled_and_returns_true_once() {
        let broker = RunBroker::new(test_config());
        let (run_id, _) =
            broker.create_runtime_run(params(), None, "fp1".into(), |_| async { Ok(()) }).await.unwrap();
        assert!(broker.cancel(run_id, Some("user requested".into())));
        assert_eq!(broker.get_snapshot(run_id).unwrap().state, RunState::Cancelled);
        assert!(!broker.cancel(run_id, None), "second cancel on an already-terminal run must be a no-op");
    }

    #[tokio::test]
    async fn late_subscriber_replays_then_tracks_live_events() {
        let broker = RunBroker::new(test_config());
        let (run_id, _) =
            broker.create_runtime_run(params(), None, "fp1".into(), |_| async { Ok(()) }).await.unwrap();
        broker.emit(run_id, EventPayload::MessageStart { message_id: "m1".into() });
        broker.emit(run_id, EventPayload::TextDelta { text: "hi".into(), delta: "hi".into() });

        let sub = broker.subscribe(run_id, 0).unwrap();
        let (snapshot, replayed) = (sub.snapshot, sub.replayed);
        let mut rx = sub.receiver;
        assert_eq!(snapshot.last_seq, 2);
        assert_eq!(replayed.len(), 2);

        broker.emit(run_id, EventPayload::MessageEnd { message_id: "m1".into() });
        let live = rx.recv().await.unwrap();
        assert_eq!(live.seq, 3);
    }

    #[tokio::test]
    async fn subscribe_past_evicted_events_reports_lagged() {
        let broker = RunBroker::new(test_config());
        let (run_id, _) =
            broker.create_runtime_run(params(), None, "fp1".into(), |_| async { Ok(()) }).await.unwrap();
        for i in 0..150 {
            broker.emit(run_id, EventPayload::TextDelta { text: i.to_string(), delta: i.to_string() });
        }
        let sub = broker.subscribe(run_id, 1).unwrap();
        assert!(sub.lagged);
    }

    #[tokio::test]
    async fn get_snapshot_of_unknown_run_is_none() {
        let broker = RunBroker::new(test_config());
        assert!(broker.get_snapshot(Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn sweep_reclaims_idle_terminal_runs_past_retention() {
        let broker = RunBroker::new(test_config());
        let (run_id, _) =
            broker.create_runtime_run(params(), None, "fp1".into(), |_| async { Ok(()) }).await.unwrap();
        broker.emit(run_id, EventPayload::Done);

        if let Some(entry_arc) = broker.entry(run_id) {
            entry_arc.lock().set_updated_at_for_test(Utc::now() - chrono::Duration::milliseconds(120_000));
        }
        broker.sweep_now();
        assert!(broker.get_snapshot(run_id).is_none());
    }

    #[tokio::test]
    async fn sweep_leaves_runs_with_active_subscribers() {
        let broker = RunBroker::new(test_config());
        let (run_id, _) =
            broker.create_runtime_run(params(), None, "fp1".into(), |_| async { Ok(()) }).await.unwrap();
        broker.emit(run_id, EventPayload::Done);
        let _sub = broker.subscribe(run_id, 0).unwrap();

        if let Some(entry_arc) = broker.entry(run_id) {
            entry_arc.lock().set_updated_at_for_test(Utc::now() - chrono::Duration::milliseconds(120_000));
        }
        broker.sweep_now();
        assert!(broker.get_snapshot(run_id).is_some());
    }
}
