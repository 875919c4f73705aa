use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertEventKind {
    TaskStarted,
    TaskProgress,
    TaskCompleted,
    TaskFailed,
    CostUpdate,
    SecurityEvent,
    BudgetWarning,
    BudgetExceeded,
    AutopilotMetrics,
    Escalation,
}

/// An operational event from the executor (or another producer) feeding
/// the alerting engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertEventKind,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub task_title: String,
    #[serde(default)]
    pub project_path: String,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub progress: i64,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(kind: AlertEventKind) -> Self {
        AlertEvent {
            kind,
            task_id: String::new(),
            task_title: String::new(),
            project_path: String::new(),
            phase: String::new(),
            progress: 0,
            error: String::new(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>, task_title: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self.task_title = task_title.into();
        self
    }

    pub fn with_project(mut self, project_path: impl Into<String>) -> Self {
        self.project_path = project_path.into();
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>, progress: i64) -> Self {
        self.phase = phase.into();
        self.progress = progress;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The retry-tracked stream this event belongs to: the producer's
    /// `source` metadata when present, the task ID otherwise.
    pub fn retry_source(&self) -> String {
        self.metadata
            .get("source")
            .cloned()
            .unwrap_or_else(|| self.task_id.clone())
    }

    /// Alert origin, `task:<id>` when a task produced the event.
    pub fn alert_source(&self) -> String {
        if !self.task_id.is_empty() {
            format!("task:{}", self.task_id)
        } else if let Some(source) = self.metadata.get("source") {
            source.clone()
        } else {
            "system".to_string()
        }
    }

    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn metadata_i64(&self, key: &str) -> Option<i64> {
        self.metadata.get(key).and_then(|v| v.trim().parse().ok())
    }
}
