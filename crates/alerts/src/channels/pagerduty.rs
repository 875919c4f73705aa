use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::{
    alert::{Alert, Severity},
    channel::{Channel, ChannelError},
};

const EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

fn pd_severity(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "critical",
        Severity::Warning => "warning",
        Severity::Info => "info",
    }
}

/// PagerDuty Events v2. The dedup key coalesces recurrences of the same
/// alert stream into one incident at the provider.
pub struct PagerDutyChannel {
    name: String,
    enabled: bool,
    severities: Vec<Severity>,
    routing_key: String,
    events_url: String,
    client: Client,
}

impl PagerDutyChannel {
    pub fn new(name: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            severities: Vec::new(),
            routing_key: routing_key.into(),
            events_url: EVENTS_URL.to_string(),
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

    pub fn dedup_key(alert: &Alert) -> String {
        format!("pilot-{}-{}", alert.alert_type, alert.source)
    }

    pub fn build_payload(routing_key: &str, alert: &Alert) -> Value {
        json!({
            "routing_key": routing_key,
            "event_action": "trigger",
            "dedup_key": Self::dedup_key(alert),
            "payload": {
                "summary": format!("{}: {}", alert.title, alert.message),
                "source": alert.source,
                "severity": pd_severity(alert.severity),
                "timestamp": alert.created_at.to_rfc3339(),
                "component": "pilot",
                "group": alert.project_path,
                "class": alert.alert_type,
                "custom_details": alert.metadata,
            }
        })
    }
}

#[async_trait]
impl Channel for PagerDutyChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "pagerduty"
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn severities(&self) -> &[Severity] {
        &self.severities
    }

    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let payload = Self::build_payload(&self.routing_key, alert);
        let response = self
            .client
            .post(&self.events_url)
            .json(&payload)
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

    #[test]
    fn payload_matches_events_v2_contract() {
        let mut alert = Alert::new(
            "escalation",
            Severity::Critical,
            "Escalation",
            "issue:GH-1 failed 3 times",
            "issue:GH-1",
            "acme/api",
        );
        alert
            .metadata
            .insert("retry_count".to_string(), "3".to_string());

        let payload = PagerDutyChannel::build_payload("rk-123", &alert);
        assert_eq!(payload["routing_key"], "rk-123");
        assert_eq!(payload["event_action"], "trigger");
        assert_eq!(payload["dedup_key"], "pilot-escalation-issue:GH-1");
        assert_eq!(payload["payload"]["severity"], "critical");
        assert_eq!(payload["payload"]["component"], "pilot");
        assert_eq!(payload["payload"]["group"], "acme/api");
        assert_eq!(payload["payload"]["class"], "escalation");
        assert_eq!(payload["payload"]["custom_details"]["retry_count"], "3");
        // RFC3339 timestamp
        let ts = payload["payload"]["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn identical_streams_share_a_dedup_key() {
        let a = Alert::new("task_failed", Severity::Warning, "t", "m1", "task:9", "p");
        let b = Alert::new("task_failed", Severity::Warning, "t", "m2", "task:9", "p");
        assert_eq!(PagerDutyChannel::dedup_key(&a), PagerDutyChannel::dedup_key(&b));
    }
}
