//! Session monitor for kpub.
//!
//! Owns the single chat connection, maps resolved peers to per-chat settings,
//! and runs one detached download, convert and upload pipeline per accepted
//! document. Shutdown stops intake and waits for in-flight files.

mod authenticator;
mod chat_client;
mod converter;
mod in_flight;
#[cfg(feature = "mtproto")]
mod mtproto;
mod peer_identity;
mod pipeline;
mod session_monitor;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use authenticator::{
    authenticate, Authenticator, LinePromptAuthenticator, TerminalAuthenticator,
};
pub use chat_client::{
    ChatClient, DocumentAttribute, DocumentMedia, InboundMessage, InboundUpdate, MessageMedia,
    RemoteHandle, SignInOutcome,
};
pub use converter::{kepub_output_path, Converter, EbookConvert, KEPUB_SUFFIX};
pub use in_flight::{InFlightFiles, InFlightGuard};
#[cfg(feature = "mtproto")]
pub use mtproto::{GrammersChatClient, MtprotoSettings};
pub use peer_identity::PeerIdentity;
pub use pipeline::{
    failed_message, run_file_pipeline, started_message, success_message, FileJob,
    PipelineContext, PipelineOutcome, PipelineStage,
};
pub use session_monitor::{
    file_extension, ChatRegistry, MonitorSettings, MonitorState, MonitoredChatEntry,
    SessionMonitor,
};
