//! Interactive login for a session with no stored authorization.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;

use crate::chat_client::{ChatClient, SignInOutcome};

/// Supplies the answers for an interactive login. Any error is fatal.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn phone_number(&self) -> Result<String>;
    async fn login_code(&self) -> Result<String>;
    async fn password(&self, hint: Option<&str>) -> Result<String>;
}

/// Runs phone, code and optional two-factor steps once. Sign-up is not supported.
pub async fn authenticate(client: &dyn ChatClient, authenticator: &dyn Authenticator) -> Result<()> {
    let phone = authenticator.phone_number().await?;
    client
        .request_login_code(&phone)
        .await
        .context("failed to request login code")?;

    let code = authenticator.login_code().await?;
    match client.sign_in(&code).await.context("sign-in failed")? {
        SignInOutcome::Authorized => Ok(()),
        SignInOutcome::PasswordRequired { hint } => {
            let password = authenticator.password(hint.as_deref()).await?;
            client
                .check_password(&password)
                .await
                .context("two-factor password was rejected")
        }
    }
}

/// Prompts on a writer and reads one answer per line from a reader.
pub struct LinePromptAuthenticator<R, W> {
    io: Mutex<(R, W)>,
}

pub type TerminalAuthenticator = LinePromptAuthenticator<BufReader<Stdin>, Stdout>;

impl TerminalAuthenticator {
    pub fn terminal() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> LinePromptAuthenticator<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }

    pub fn into_inner(self) -> (R, W) {
        self.io.into_inner()
    }

    async fn prompt(&self, prompt: &str, what: &str) -> Result<String> {
        let mut io = self.io.lock().await;
        let (reader, writer) = &mut *io;
        writer
            .write_all(prompt.as_bytes())
            .await
            .context("failed to write prompt")?;
        writer.flush().await.context("failed to flush prompt")?;

        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .await
            .with_context(|| format!("failed to read {what}"))?;
        if read == 0 {
            bail!("failed to read {what}: input closed");
        }
        let answer = line.trim();
        if answer.is_empty() {
            bail!("failed to read {what}: empty input");
        }
        Ok(answer.to_string())
    }
}

#[async_trait]
impl<R, W> Authenticator for LinePromptAuthenticator<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn phone_number(&self) -> Result<String> {
        self.prompt("Enter your phone number (e.g. +1234567890): ", "phone number")
            .await
    }

    async fn login_code(&self) -> Result<String> {
        self.prompt("Enter Telegram verification code: ", "verification code")
            .await
    }

    async fn password(&self, hint: Option<&str>) -> Result<String> {
        let prompt = match hint {
            Some(hint) if !hint.is_empty() => format!("Enter 2FA password (hint: {hint}): "),
            _ => "Enter 2FA password: ".to_string(),
        };
        self.prompt(&prompt, "password").await
    }
}
