use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::{
    alert::{Alert, Severity},
    channel::{Channel, ChannelError},
};

fn attachment_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "danger",
        Severity::Warning => "warning",
        Severity::Info => "#0066cc",
    }
}

/// Incoming-webhook delivery using block kit.
pub struct SlackChannel {
    name: String,
    enabled: bool,
    severities: Vec<Severity>,
    webhook_url: String,
    client: Client,
}

impl SlackChannel {
    pub fn new(name: impl Into<String>, webhook_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            severities: Vec::new(),
            webhook_url: webhook_url.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
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

    pub fn build_payload(alert: &Alert) -> Value {
        let severity_upper = alert.severity.to_string().to_uppercase();
        let header = format!("{} {} Alert", alert.severity.emoji(), severity_upper);
        let project = if alert.project_path.is_empty() {
            "-"
        } else {
            &alert.project_path
        };
        json!({
            "attachments": [{
                "color": attachment_color(alert.severity),
                "blocks": [
                    {
                        "type": "header",
                        "text": { "type": "plain_text", "text": header, "emoji": true }
                    },
                    {
                        "type": "section",
                        "text": {
                            "type": "mrkdwn",
                            "text": format!("*{}*\n{}", alert.title, alert.message)
                        }
                    },
                    {
                        "type": "context",
                        "elements": [
                            { "type": "mrkdwn", "text": format!("type: `{}`", alert.alert_type) },
                            { "type": "mrkdwn", "text": format!("source: `{}`", alert.source) },
                            { "type": "mrkdwn", "text": format!("project: `{project}`") }
                        ]
                    }
                ]
            }]
        })
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "slack"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn severities(&self) -> &[Severity] {
        &self.severities
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&Self::build_payload(alert))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(severity: Severity) -> Alert {
        Alert::new(
            "task_failed",
            severity,
            "Build broke",
            "tests failed on main",
            "task:42",
            "acme/api",
        )
    }

    #[test]
    fn payload_carries_header_section_and_context() {
        let payload = SlackChannel::build_payload(&alert(Severity::Critical));
        let blocks = &payload["attachments"][0]["blocks"];

        assert_eq!(blocks[0]["type"], "header");
        let header = blocks[0]["text"]["text"].as_str().unwrap();
        assert!(header.contains("CRITICAL Alert"));
        assert!(header.starts_with('\u{1F6A8}'));

        assert_eq!(blocks[1]["text"]["type"], "mrkdwn");
        assert_eq!(
            blocks[1]["text"]["text"],
            "*Build broke*\ntests failed on main"
        );

        let context = blocks[2]["elements"].as_array().unwrap();
        assert_eq!(context.len(), 3);
        assert!(context[0]["text"].as_str().unwrap().contains("task_failed"));
        assert!(context[1]["text"].as_str().unwrap().contains("task:42"));
        assert!(context[2]["text"].as_str().unwrap().contains("acme/api"));
    }

    #[test]
    fn color_per_severity() {
        for (severity, color) in [
            (Severity::Critical, "danger"),
            (Severity::Warning, "warning"),
            (Severity::Info, "#0066cc"),
        ] {
            let payload = SlackChannel::build_payload(&alert(severity));
            assert_eq!(payload["attachments"][0]["color"], color);
        }
    }
}
