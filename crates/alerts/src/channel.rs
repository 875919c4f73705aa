use async_trait::async_trait;
use thiserror::Error;

use crate::alert::{Alert, Severity};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("channel misconfigured: {0}")]
    Config(String),
}

/// A delivery adapter. Implementations are side-effect-only: `send`
/// either delivers or reports why it could not.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> &'static str;

    fn enabled(&self) -> bool {
        true
    }

    /// Severities this channel accepts; empty accepts all.
    fn severities(&self) -> &[Severity] {
        &[]
    }

    fn accepts(&self, severity: Severity) -> bool {
        self.severities().is_empty() || self.severities().contains(&severity)
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError>;
}
