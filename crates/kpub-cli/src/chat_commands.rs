use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use kpub_config::{load_config, remove_chat, write_config, KpubConfig};

pub(crate) fn list_chats(config: &KpubConfig, out: &mut impl Write) -> Result<()> {
    for chat in config.resolved_chats() {
        writeln!(
            out,
            "{}\tformats={}\tstorage={}\ttoken_file={}",
            chat.handle, chat.accepted_formats, chat.storage.kind, chat.storage.dropbox.token_file
        )
        .context("failed to write chat list")?;
    }
    Ok(())
}

/// Rewrites the file without `handle`. A running service picks the change up
/// through its config watcher.
pub(crate) fn remove_chat_from_file(config_path: &Path, handle: &str, confirmed: bool) -> Result<()> {
    if !confirmed {
        bail!("refusing to remove chat '{handle}' without --yes");
    }
    let mut config = load_config(config_path)?;
    remove_chat(&mut config, handle)?;
    write_config(config_path, &config)?;
    tracing::info!(handle, path = %config_path.display(), "chat removed from config");
    Ok(())
}
