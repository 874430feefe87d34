//! Operator confirmation before destructive actions.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[allow(async_fn_in_trait)]
pub trait ConfirmationGate {
    /// Block until the operator allows the run to continue.
    async fn confirm(&self, prompt: &str) -> std::io::Result<()>;
}

/// Waits for a line on standard input.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConfirmation;

impl ConfirmationGate for StdinConfirmation {
    async fn confirm(&self, prompt: &str) -> std::io::Result<()> {
        let mut stderr = tokio::io::stderr();
        stderr.write_all(format!("{prompt}\n").as_bytes()).await?;
        stderr.flush().await?;
        let mut line = String::new();
        let read = BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "standard input closed",
            ));
        }
        Ok(())
    }
}
