//! The Run entry: per-run lifecycle state, bounded event ring, and the
//! subscriber table the broker dispatches envelopes through. Unlike the
//! session-level run log this crate's name is descended from, a Run here
//! is never written to disk — the ring is a transient mirror for
//! streaming; the Persistence RPC owns the durable record.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rb_domain::envelope::{Envelope, EventPayload};
use rb_domain::tool::Message;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal_state(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed | RunState::Cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct RunParams {
    pub session_id: String,
    pub workspace_id: String,
    pub user_request: String,
    pub coordinator_agent_id: String,
    pub start_candidate_offset: Option<usize>,
    /// Prior-turn messages fetched via `GetContinueContextBy{Message,Run}`
    /// when the run resumes an earlier conversation. Spliced in between the
    /// system prompt and the fresh user request; `None` starts a clean
    /// conversation.
    pub resume_messages: Option<Vec<Message>>,
}

#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub seq: u64,
    pub event: Envelope,
}

#[derive(Debug, Clone, Copy)]
pub struct RunSnapshot {
    pub state: RunState,
    pub terminal: bool,
    pub last_seq: u64,
}

pub struct RunEntry {
    pub run_id: Uuid,
    pub params: RunParams,
    pub state: RunState,
    pub terminal: bool,
    next_seq: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    max_events: usize,
    events: VecDeque<StoredEvent>,
    subscribers: HashMap<u64, UnboundedSender<Envelope>>,
    next_subscriber_id: u64,
}

impl RunEntry {
    pub fn new(run_id: Uuid, params: RunParams, max_events: usize) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            params,
            state: RunState::Queued,
            terminal: false,
            next_seq: 1,
            created_at: now,
            updated_at: now,
            max_events: max_events.clamp(100, 5000),
            events: VecDeque::new(),
            subscribers: HashMap::new(),
            next_subscriber_id: 0,
        }
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot { state: self.state, terminal: self.terminal, last_seq: self.next_seq.saturating_sub(1) }
    }

    /// Admits `payload` unconditionally, updating lifecycle state and
    /// dispatching to every live subscriber. Callers that must respect the
    /// "no-op once terminal" rule check `self.terminal` before calling this
    /// — `RunBroker::cancel` deliberately bypasses that check to admit its
    /// own synthetic error+done pair after flipping state to cancelled.
    pub(crate) fn admit(&mut self, payload: EventPayload) -> Envelope {
        self.apply_lifecycle(&payload);
        let envelope = Envelope { seq: self.next_seq, emitted_at: Utc::now(), payload };
        self.next_seq += 1;
        self.updated_at = envelope.emitted_at;

        self.events.push_back(StoredEvent { seq: envelope.seq, event: envelope.clone() });
        while self.events.len() > self.max_events {
            self.events.pop_front();
        }

        self.subscribers.retain(|_, tx| tx.send(envelope.clone()).is_ok());
        envelope
    }

    fn apply_lifecycle(&mut self, payload: &EventPayload) {
        match payload {
            EventPayload::Error { .. } => {
                if self.state != RunState::Cancelled {
                    self.state = RunState::Failed;
                }
            }
            EventPayload::Done => {
                if matches!(self.state, RunState::Queued | RunState::Running) {
                    self.state = RunState::Completed;
                }
                self.terminal = true;
            }
            _ => {
                if self.state == RunState::Queued {
                    self.state = RunState::Running;
                }
            }
        }
    }

    /// Registers `tx` as a live subscriber and returns every buffered event
    /// with `seq > cursor`, the subscriber id for later unsubscribe, and
    /// whether the ring had already evicted events this cursor expected to
    /// see (`last_seq - cursor` exceeds the number of events still
    /// retained). Both the replay and the registration happen under the
    /// same lock the caller holds, so no event admitted after this call can
    /// be missed and none before the replay snapshot can be delivered
    /// twice.
    pub(crate) fn subscribe(&mut self, cursor: u64, tx: UnboundedSender<Envelope>) -> (u64, Vec<Envelope>, bool) {
        let last_seq = self.next_seq.saturating_sub(1);
        let lagged = cursor > 0 && last_seq.saturating_sub(cursor) > self.events.len() as u64;

        let replay: Vec<Envelope> =
            self.events.iter().filter(|stored| stored.seq > cursor).map(|stored| stored.event.clone()).collect();
        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;
        self.subscribers.insert(id, tx);
        (id, replay, lagged)
    }

    pub(crate) fn unsubscribe(&mut self, id: u64) {
        self.subscribers.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    #[cfg(test)]
    pub(crate) fn set_updated_at_for_test(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

#[derive(Debug, Clone)]
pub struct IdempotencyEntry {
    pub run_id: Uuid,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
fn sample_params() -> RunParams {
    RunParams {
        session_id: "s1".into(),
        workspace_id: "ws1".into(),
        user_request: "hello".into(),
        coordinator_agent_id: "agent-a".into(),
        start_candidate_offset: None,
        resume_messages: None,
    }
}
