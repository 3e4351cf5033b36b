//! Channel session binding: the persistent (channelId, senderId,
//! platformChatId) → agentId mapping that routes follow-up inbound messages
//! without re-evaluating routing rules every time.

pub mod store;

pub use store::{ChannelSession, SessionStore};
