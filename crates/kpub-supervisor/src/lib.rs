//! Chat supervisor for kpub.
//!
//! Starts the session monitor, registers the configured chats once it is
//! ready, and reconciles the monitor's registry whenever the configuration
//! file changes. Change notifications are debounced so an editor's burst of
//! writes produces one reload.

mod chat_reconciler;
mod chat_supervisor;
mod config_watcher;
mod debounce;

pub use chat_reconciler::{diff_chat_sets, ChatReconciler, ChatSetDiff, ReloadSummary};
pub use chat_supervisor::{ChatSupervisor, SupervisorDeps};
pub use config_watcher::ConfigWatcher;
pub use debounce::Debouncer;
