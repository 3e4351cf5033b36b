//! Channel Pipeline: the `ChannelPlugin` capability interface, a webchat
//! reference implementation, and webhook-to-dispatch plumbing.

pub mod pipeline;
pub mod plugin;
pub mod webchat;

pub use pipeline::{handle_webhook, ChannelRunRequest, PipelineOutcome, RunDispatcher};
pub use plugin::{ChannelError, ChannelPlugin, ParsedMessage, PluginConfig};
pub use webchat::WebchatPlugin;
