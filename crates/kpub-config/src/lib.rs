//! Configuration model and loading for kpub.
//!
//! The configuration is a YAML document holding Telegram credentials, global
//! defaults, working paths, pipeline tuning and the ordered list of monitored
//! chats. Loading applies defaults and validates; resolution merges each
//! chat's overrides onto the defaults.

mod chat_resolution;
mod config_loader;
mod config_model;

pub use chat_resolution::{normalize_format, resolve_chat, AcceptedFormats, ResolvedChatConfig};
pub use config_loader::{
    apply_defaults, load_config, parse_config, remove_chat, validate_config, write_config,
};
pub use config_model::*;
