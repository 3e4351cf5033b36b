//! Channel session store.
//!
//! Persists `sessions.json` under the configured state directory. A session
//! is unique by `(channel_id, sender_id, platform_chat_id)`; the first
//! inbound message matching a routing rule creates it, every later inbound
//! on the same triple just touches `last_active_at`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rb_domain::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A persistent binding from a platform user+chat to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSession {
    pub id: String,
    pub channel_id: String,
    pub workspace_id: String,
    pub sender_id: String,
    pub platform_chat_id: String,
    pub agent_id: String,
    pub last_active_at: DateTime<Utc>,
}

fn session_key(channel_id: &str, sender_id: &str, platform_chat_id: &str) -> String {
    format!("{channel_id}:{sender_id}:{platform_chat_id}")
}

pub struct SessionStore {
    sessions_path: PathBuf,
    sessions: RwLock<HashMap<String, ChannelSession>>,
}

impl SessionStore {
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let sessions_path = state_path.join("channel_sessions.json");

        let sessions = if sessions_path.exists() {
            let raw = std::fs::read_to_string(&sessions_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            sessions = sessions.len(),
            path = %sessions_path.display(),
            "channel session store loaded"
        );

        Ok(Self {
            sessions_path,
            sessions: RwLock::new(sessions),
        })
    }

    pub fn get(&self, channel_id: &str, sender_id: &str, platform_chat_id: &str) -> Option<ChannelSession> {
        let key = session_key(channel_id, sender_id, platform_chat_id);
        self.sessions.read().get(&key).cloned()
    }

    /// Resolve the session for this triple, creating and binding it to
    /// `agent_id`/`workspace_id` if this is the first inbound message.
    /// Returns `(session, is_new)`.
    pub fn resolve_or_touch(
        &self,
        channel_id: &str,
        sender_id: &str,
        platform_chat_id: &str,
        agent_id: &str,
        workspace_id: &str,
    ) -> (ChannelSession, bool) {
        let key = session_key(channel_id, sender_id, platform_chat_id);

        {
            let mut sessions = self.sessions.write();
            if let Some(entry) = sessions.get_mut(&key) {
                entry.last_active_at = Utc::now();
                return (entry.clone(), false);
            }
        }

        let entry = ChannelSession {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id: channel_id.to_owned(),
            workspace_id: workspace_id.to_owned(),
            sender_id: sender_id.to_owned(),
            platform_chat_id: platform_chat_id.to_owned(),
            agent_id: agent_id.to_owned(),
            last_active_at: Utc::now(),
        };

        let mut sessions = self.sessions.write();
        // Re-check: another thread may have created it while we built `entry`.
        if let Some(existing) = sessions.get_mut(&key) {
            existing.last_active_at = Utc::now();
            return (existing.clone(), false);
        }
        sessions.insert(key, entry.clone());

        tracing::info!(session_id = %entry.id, channel_id, sender_id, "channel session created");
        (entry, true)
    }

    pub fn list(&self) -> Vec<ChannelSession> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn flush(&self) -> Result<()> {
        let sessions = self.sessions.read();
        let json = serde_json::to_string_pretty(&*sessions).map_err(Error::Json)?;
        std::fs::write(&self.sessions_path, json).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn first_inbound_creates_a_session() {
        let (_dir, store) = temp_store();
        let (session, is_new) = store.resolve_or_touch("discord", "alice", "chat1", "agent-a", "ws1");
        assert!(is_new);
        assert_eq!(session.agent_id, "agent-a");
    }

    #[test]
    fn repeat_inbound_touches_not_recreates() {
        let (_dir, store) = temp_store();
        let (first, _) = store.resolve_or_touch("discord", "alice", "chat1", "agent-a", "ws1");
        let (second, is_new) = store.resolve_or_touch("discord", "alice", "chat1", "agent-b", "ws1");
        assert!(!is_new);
        assert_eq!(second.id, first.id);
        // agent_id stays bound to whoever created it; a later inbound does not re-route.
        assert_eq!(second.agent_id, "agent-a");
    }

    #[test]
    fn unique_by_full_triple() {
        let (_dir, store) = temp_store();
        store.resolve_or_touch("discord", "alice", "chat1", "agent-a", "ws1");
        let (_, is_new) = store.resolve_or_touch("discord", "alice", "chat2", "agent-a", "ws1");
        assert!(is_new);
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn flush_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SessionStore::new(dir.path()).unwrap();
            store.resolve_or_touch("discord", "alice", "chat1", "agent-a", "ws1");
            store.flush().unwrap();
        }
        let reloaded = SessionStore::new(dir.path()).unwrap();
        assert_eq!(reloaded.list().len(), 1);
    }
}
