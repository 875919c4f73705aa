use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::alert::Severity;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuleType {
    TaskFailed,
    ConsecutiveFailures,
    TaskStuck,
    DailySpendExceeded,
    BudgetDepleted,
    UnauthorizedAccess,
    SensitiveFileModified,
    FailedQueueHigh,
    CircuitBreakerTrip,
    ApiErrorRateHigh,
    PrStuckWaitingCi,
    Deadlock,
    Escalation,
}

/// Discriminated condition fields; each rule type consults only its own
/// subset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleCondition {
    pub consecutive_failures: Option<i64>,
    pub escalation_retries: Option<i64>,
    pub stuck_minutes: Option<i64>,
    pub daily_spend_threshold: Option<f64>,
    pub budget_limit: Option<f64>,
    pub failed_queue_depth: Option<i64>,
    pub circuit_breaker_trips: Option<i64>,
    pub api_error_rate: Option<f64>,
    pub pr_stuck_count: Option<i64>,
    pub pr_max_wait_minutes: Option<i64>,
    pub no_progress_minutes: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct AlertRule {
    pub name: String,
    pub rule_type: RuleType,
    pub enabled: bool,
    pub condition: RuleCondition,
    pub severity: Severity,
    /// Channel names to deliver to; empty targets every enabled channel
    /// whose severity set accepts the alert.
    pub channels: Vec<String>,
    pub cooldown: Duration,
    pub description: String,
}

impl AlertRule {
    pub fn new(name: impl Into<String>, rule_type: RuleType) -> Self {
        AlertRule {
            name: name.into(),
            rule_type,
            enabled: true,
            condition: RuleCondition::default(),
            severity: Severity::Warning,
            channels: Vec::new(),
            cooldown: Duration::ZERO,
            description: String::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_condition(mut self, condition: RuleCondition) -> Self {
        self.condition = condition;
        self
    }
}
