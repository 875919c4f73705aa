use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rules::AlertRule;

/// Bound on the delivery-history ring.
pub const HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct TaskProgress {
    pub progress: i64,
    pub phase: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertHistoryEntry {
    pub alert_id: Uuid,
    pub rule_name: String,
    pub source: String,
    pub fired_at: DateTime<Utc>,
    pub delivered_to: Vec<String>,
}

/// All mutable evaluator state. Owned by the processor task; the sweeper
/// and history readers go through the engine's lock.
#[derive(Debug, Default)]
pub struct AlertState {
    pub last_alert_times: HashMap<String, DateTime<Utc>>,
    pub consecutive_failures: HashMap<String, i64>,
    pub task_last_progress: HashMap<String, TaskProgress>,
    pub retry_tracker: HashMap<String, i64>,
    history: VecDeque<AlertHistoryEntry>,
}

impl AlertState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `rule` may fire at `now`: cooldown zero, never fired, or
    /// the cooldown has elapsed since the last fire.
    pub fn should_fire(&self, rule: &AlertRule, now: DateTime<Utc>) -> bool {
        if rule.cooldown.is_zero() {
            return true;
        }
        match self.last_alert_times.get(&rule.name) {
            None => true,
            Some(last) => {
                let elapsed = (now - *last).to_std().unwrap_or_default();
                elapsed >= rule.cooldown
            }
        }
    }

    /// Stamp the rule as fired. Called before dispatch so delivery latency
    /// cannot re-enable the rule.
    pub fn mark_fired(&mut self, rule_name: &str, now: DateTime<Utc>) {
        self.last_alert_times.insert(rule_name.to_string(), now);
    }

    pub fn push_history(&mut self, entry: AlertHistoryEntry) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    pub fn history(&self) -> Vec<AlertHistoryEntry> {
        self.history.iter().cloned().collect()
    }

    pub fn record_progress(&mut self, task_id: &str, progress: i64, phase: &str, at: DateTime<Utc>) {
        self.task_last_progress.insert(
            task_id.to_string(),
            TaskProgress {
                progress,
                phase: phase.to_string(),
                updated_at: at,
            },
        );
    }

    /// Advance a task's progress snapshot; late or rewound updates for the
    /// same phase are ignored.
    pub fn advance_progress(
        &mut self,
        task_id: &str,
        progress: i64,
        phase: &str,
        at: DateTime<Utc>,
    ) {
        match self.task_last_progress.get_mut(task_id) {
            Some(current) => {
                if progress > current.progress || current.phase != phase {
                    current.progress = progress;
                    current.phase = phase.to_string();
                    current.updated_at = at;
                }
            }
            None => self.record_progress(task_id, progress, phase, at),
        }
    }
}
