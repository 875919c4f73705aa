use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Parse a configured severity; unknown or empty values become
    /// `warning`.
    pub fn parse_or_warning(input: &str) -> Severity {
        input.trim().parse().unwrap_or(Severity::Warning)
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Critical => "\u{1F6A8}",
            Severity::Warning => "\u{26A0}\u{FE0F}",
            Severity::Info => "\u{2139}\u{FE0F}",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub source: String,
    pub project_path: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(
        alert_type: impl Into<String>,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<String>,
        project_path: impl Into<String>,
    ) -> Self {
        Alert {
            id: Uuid::new_v4(),
            alert_type: alert_type.into(),
            severity,
            title: title.into(),
            message: message.into(),
            source: source.into(),
            project_path: project_path.into(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            acked_at: None,
            resolved_at: None,
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_parsing_defaults_to_warning() {
        assert_eq!(Severity::parse_or_warning("critical"), Severity::Critical);
        assert_eq!(Severity::parse_or_warning("info"), Severity::Info);
        assert_eq!(Severity::parse_or_warning(""), Severity::Warning);
        assert_eq!(Severity::parse_or_warning("sev1"), Severity::Warning);
    }

    #[test]
    fn alert_serializes_type_field() {
        let alert = Alert::new(
            "task_failed",
            Severity::Critical,
            "t",
            "m",
            "task:1",
            "acme/api",
        );
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "task_failed");
        assert_eq!(json["severity"], "critical");
        assert!(json.get("acked_at").is_none());
    }
}
