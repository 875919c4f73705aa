use async_trait::async_trait;

use crate::{
    alert::{Alert, Severity},
    channel::{Channel, ChannelError},
};

/// Logs alerts through `tracing`. The default sink, and the stub adapter
/// used by tests.
pub struct ConsoleChannel {
    name: String,
    enabled: bool,
    severities: Vec<Severity>,
}

impl ConsoleChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            severities: Vec::new(),
        }
    }

    pub fn with_severities(mut self, severities: Vec<Severity>) -> Self {
        self.severities = severities;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "console"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn severities(&self) -> &[Severity] {
        &self.severities
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        tracing::info!(
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            source = %alert.source,
            project = %alert.project_path,
            "{}: {}",
            alert.title,
            alert.message
        );
        Ok(())
    }
}
