use std::{
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    alert::{Alert, Severity},
    dispatcher::Dispatcher,
    event::{AlertEvent, AlertEventKind},
    rules::{AlertRule, RuleType},
    state::{AlertHistoryEntry, AlertState, TaskProgress},
};

/// Ingestion queue bound; events beyond it are dropped with a warning.
pub const EVENT_BUS_CAPACITY: usize = 100;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_STUCK_MINUTES: i64 = 10;
const DEFAULT_ESCALATION_RETRIES: i64 = 3;
const DEFAULT_CONSECUTIVE_FAILURES: i64 = 3;
const DEFAULT_FAILED_QUEUE_DEPTH: i64 = 10;
const DEFAULT_API_ERROR_RATE: f64 = 0.5;
const DEFAULT_PR_MAX_WAIT_MINUTES: i64 = 30;
const DEFAULT_NO_PROGRESS_MINUTES: i64 = 15;

struct Inner {
    rules: Vec<AlertRule>,
    dispatcher: Arc<Dispatcher>,
    state: RwLock<AlertState>,
    tx: mpsc::Sender<AlertEvent>,
    rx: Mutex<Option<mpsc::Receiver<AlertEvent>>>,
    shutdown: CancellationToken,
}

/// Rule-driven alert processor.
///
/// A single task drains the event bus and owns all evaluator state, so
/// the per-event handling needs no locks of its own; readers (history,
/// the sweeper snapshot) come through the shared `RwLock`.
#[derive(Clone)]
pub struct AlertEngine {
    inner: Arc<Inner>,
}

impl AlertEngine {
    pub fn new(rules: Vec<AlertRule>, dispatcher: Arc<Dispatcher>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_BUS_CAPACITY);
        AlertEngine {
            inner: Arc::new(Inner {
                rules,
                dispatcher,
                state: RwLock::new(AlertState::new()),
                tx,
                rx: Mutex::new(Some(rx)),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Spawn the processor and the stuck-task sweeper.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let rx = self
            .inner
            .rx
            .lock()
            .unwrap()
            .take()
            .expect("alert engine already started");
        let processor = {
            let engine = self.clone();
            tokio::spawn(async move { engine.run_processor(rx).await })
        };
        let sweeper = {
            let engine = self.clone();
            tokio::spawn(async move { engine.run_sweeper().await })
        };
        vec![processor, sweeper]
    }

    /// Enqueue an event; drops it with a warning when the bus is full.
    pub fn process_event(&self, event: AlertEvent) {
        if self.inner.tx.try_send(event).is_err() {
            tracing::warn!("alert event bus full, dropping event");
        }
    }

    pub fn stop(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn alert_history(&self) -> Vec<AlertHistoryEntry> {
        self.inner.state.read().unwrap().history()
    }

    /// Current progress snapshot for one task, if tracked.
    pub fn task_progress(&self, task_id: &str) -> Option<TaskProgress> {
        self.inner
            .state
            .read()
            .unwrap()
            .task_last_progress
            .get(task_id)
            .cloned()
    }

    async fn run_processor(self, mut rx: mpsc::Receiver<AlertEvent>) {
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }
        tracing::debug!("alert processor stopped");
    }

    async fn run_sweeper(self) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await; // immediate first tick, nothing to sweep yet
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = interval.tick() => self.sweep_stuck_tasks().await,
            }
        }
    }

    async fn handle_event(&self, event: AlertEvent) {
        let now = Utc::now();
        let mut pending: Vec<(AlertRule, Alert)> = Vec::new();

        {
            let mut state = self.inner.state.write().unwrap();
            match event.kind {
                AlertEventKind::TaskStarted => {
                    state.record_progress(&event.task_id, 0, &event.phase, now);
                }
                AlertEventKind::TaskProgress => {
                    state.advance_progress(&event.task_id, event.progress, &event.phase, now);
                }
                AlertEventKind::TaskCompleted => {
                    state.consecutive_failures.remove(&event.project_path);
                    state.task_last_progress.remove(&event.task_id);
                    state.retry_tracker.remove(&event.retry_source());
                }
                AlertEventKind::TaskFailed => {
                    state.task_last_progress.remove(&event.task_id);
                    let failures = {
                        let entry = state
                            .consecutive_failures
                            .entry(event.project_path.clone())
                            .or_insert(0);
                        *entry += 1;
                        *entry
                    };
                    let retries = {
                        let entry = state.retry_tracker.entry(event.retry_source()).or_insert(0);
                        *entry += 1;
                        *entry
                    };
                    self.evaluate_failure(&event, failures, retries, &mut pending);
                }
                AlertEventKind::CostUpdate
                | AlertEventKind::BudgetWarning
                | AlertEventKind::BudgetExceeded => {
                    self.evaluate_spend(&event, &mut pending);
                }
                AlertEventKind::SecurityEvent => {
                    self.evaluate_security(&event, &mut pending);
                }
                AlertEventKind::AutopilotMetrics => {
                    self.evaluate_autopilot(&event, &mut pending);
                }
                AlertEventKind::Escalation => {
                    pending.push(escalation_event_alert(&event));
                }
            }

            // Cooldowns are stamped before dispatch so delivery latency
            // cannot re-enable a rule.
            pending.retain(|(rule, _)| {
                if state.should_fire(rule, now) {
                    state.mark_fired(&rule.name, now);
                    true
                } else {
                    false
                }
            });
        }

        for (rule, alert) in pending {
            self.fire(&rule, alert, now).await;
        }
    }

    /// Evaluate the stuck-task rules against the current progress map.
    /// Runs on a one-minute cadence; public so callers can force a sweep.
    pub async fn sweep_stuck_tasks(&self) {
        let now = Utc::now();
        let snapshot: Vec<(String, TaskProgress)> = {
            let state = self.inner.state.read().unwrap();
            state
                .task_last_progress
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        if snapshot.is_empty() {
            return;
        }

        let mut candidates: Vec<(AlertRule, Alert)> = Vec::new();
        for rule in self.inner.rules.iter().filter(|r| r.enabled) {
            if rule.rule_type != RuleType::TaskStuck {
                continue;
            }
            let threshold = rule.condition.stuck_minutes.unwrap_or(DEFAULT_STUCK_MINUTES);
            for (task_id, progress) in &snapshot {
                let stalled_min = (now - progress.updated_at).num_minutes();
                if stalled_min > threshold {
                    candidates.push((rule.clone(), stuck_alert(rule, task_id, progress, stalled_min)));
                }
            }
        }
        if candidates.is_empty() {
            return;
        }

        {
            let mut state = self.inner.state.write().unwrap();
            candidates.retain(|(rule, _)| {
                if state.should_fire(rule, now) {
                    state.mark_fired(&rule.name, now);
                    true
                } else {
                    false
                }
            });
        }
        for (rule, alert) in candidates {
            self.fire(&rule, alert, now).await;
        }
    }

    fn evaluate_failure(
        &self,
        event: &AlertEvent,
        failures: i64,
        retries: i64,
        pending: &mut Vec<(AlertRule, Alert)>,
    ) {
        for rule in self.inner.rules.iter().filter(|r| r.enabled) {
            match rule.rule_type {
                RuleType::TaskFailed => {
                    pending.push((rule.clone(), task_failed_alert(rule, event)));
                }
                RuleType::ConsecutiveFailures => {
                    let threshold = rule
                        .condition
                        .consecutive_failures
                        .unwrap_or(DEFAULT_CONSECUTIVE_FAILURES);
                    if failures >= threshold {
                        pending
                            .push((rule.clone(), consecutive_failures_alert(rule, event, failures)));
                    }
                }
                RuleType::Escalation => {
                    let threshold = rule
                        .condition
                        .escalation_retries
                        .unwrap_or(DEFAULT_ESCALATION_RETRIES);
                    if retries >= threshold {
                        pending.push((rule.clone(), escalation_alert(rule, event, retries)));
                    }
                }
                _ => {}
            }
        }
    }

    fn evaluate_spend(&self, event: &AlertEvent, pending: &mut Vec<(AlertRule, Alert)>) {
        let daily = event.metadata_f64("daily_spend");
        let total = event.metadata_f64("total_spend");
        for rule in self.inner.rules.iter().filter(|r| r.enabled) {
            match rule.rule_type {
                RuleType::DailySpendExceeded => {
                    if let (Some(spend), Some(threshold)) =
                        (daily, rule.condition.daily_spend_threshold)
                        && spend > threshold
                    {
                        pending.push((
                            rule.clone(),
                            rule_alert(
                                rule,
                                event,
                                "Daily spend exceeded",
                                format!(
                                    "daily spend ${spend:.2} is over the ${threshold:.2} threshold"
                                ),
                            ),
                        ));
                    }
                }
                RuleType::BudgetDepleted => {
                    if let (Some(spend), Some(limit)) = (total, rule.condition.budget_limit)
                        && spend > limit
                    {
                        pending.push((
                            rule.clone(),
                            rule_alert(
                                rule,
                                event,
                                "Budget depleted",
                                format!("total spend ${spend:.2} is over the ${limit:.2} budget"),
                            ),
                        ));
                    }
                }
                _ => {}
            }
        }
    }

    fn evaluate_security(&self, event: &AlertEvent, pending: &mut Vec<(AlertRule, Alert)>) {
        for rule in self.inner.rules.iter().filter(|r| r.enabled) {
            match rule.rule_type {
                RuleType::UnauthorizedAccess => {
                    let detail = if event.error.is_empty() {
                        "access denied by sandbox policy".to_string()
                    } else {
                        event.error.clone()
                    };
                    pending.push((
                        rule.clone(),
                        rule_alert(rule, event, "Unauthorized access", detail),
                    ));
                }
                RuleType::SensitiveFileModified => {
                    let file = event
                        .metadata
                        .get("file_path")
                        .map(String::as_str)
                        .unwrap_or("unknown");
                    pending.push((
                        rule.clone(),
                        rule_alert(
                            rule,
                            event,
                            "Sensitive file modified",
                            format!("sensitive file modified: {file}"),
                        ),
                    ));
                }
                _ => {}
            }
        }
    }

    fn evaluate_autopilot(&self, event: &AlertEvent, pending: &mut Vec<(AlertRule, Alert)>) {
        for rule in self.inner.rules.iter().filter(|r| r.enabled) {
            let fired = match rule.rule_type {
                RuleType::FailedQueueHigh => event
                    .metadata_i64("failed_queue_depth")
                    .filter(|depth| {
                        *depth
                            >= rule
                                .condition
                                .failed_queue_depth
                                .unwrap_or(DEFAULT_FAILED_QUEUE_DEPTH)
                    })
                    .map(|depth| {
                        rule_alert(
                            rule,
                            event,
                            "Failed queue high",
                            format!("failed queue depth is {depth}"),
                        )
                    }),
                RuleType::CircuitBreakerTrip => event
                    .metadata_i64("circuit_breaker_trips")
                    .filter(|trips| *trips >= rule.condition.circuit_breaker_trips.unwrap_or(1))
                    .map(|trips| {
                        rule_alert(
                            rule,
                            event,
                            "Circuit breaker tripped",
                            format!("circuit breaker tripped {trips} time(s)"),
                        )
                    }),
                RuleType::ApiErrorRateHigh => event
                    .metadata_f64("api_error_rate")
                    .filter(|rate| {
                        *rate > rule.condition.api_error_rate.unwrap_or(DEFAULT_API_ERROR_RATE)
                    })
                    .map(|rate| {
                        rule_alert(
                            rule,
                            event,
                            "API error rate high",
                            format!("API error rate is {:.0}%", rate * 100.0),
                        )
                    }),
                RuleType::PrStuckWaitingCi => {
                    let count = event.metadata_i64("pr_stuck_count").unwrap_or(0);
                    let wait = event.metadata_i64("pr_max_wait_minutes").unwrap_or(0);
                    let min_count = rule.condition.pr_stuck_count.unwrap_or(1);
                    let min_wait = rule
                        .condition
                        .pr_max_wait_minutes
                        .unwrap_or(DEFAULT_PR_MAX_WAIT_MINUTES);
                    (count >= min_count && wait >= min_wait).then(|| {
                        rule_alert(
                            rule,
                            event,
                            "PRs stuck waiting on CI",
                            format!("{count} PR(s) waiting on CI for up to {wait} minutes"),
                        )
                    })
                }
                RuleType::Deadlock => event
                    .metadata_i64("no_progress_minutes")
                    .filter(|minutes| {
                        *minutes
                            >= rule
                                .condition
                                .no_progress_minutes
                                .unwrap_or(DEFAULT_NO_PROGRESS_MINUTES)
                    })
                    .map(|minutes| {
                        rule_alert(
                            rule,
                            event,
                            "Autopilot deadlock",
                            format!("no forward progress for {minutes} minutes"),
                        )
                    }),
                _ => None,
            };
            if let Some(alert) = fired {
                pending.push((rule.clone(), alert));
            }
        }
    }

    async fn fire(&self, rule: &AlertRule, alert: Alert, fired_at: DateTime<Utc>) {
        let names = if rule.channels.is_empty() {
            self.inner.dispatcher.matching_names(&alert)
        } else {
            rule.channels.clone()
        };
        let results = self.inner.dispatcher.dispatch(&alert, &names).await;
        let delivered_to: Vec<String> = results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.channel.clone())
            .collect();
        tracing::info!(
            rule = %rule.name,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            delivered = delivered_to.len(),
            requested = names.len(),
            "alert fired"
        );
        self.inner
            .state
            .write()
            .unwrap()
            .push_history(AlertHistoryEntry {
                alert_id: alert.id,
                rule_name: rule.name.clone(),
                source: alert.source.clone(),
                fired_at,
                delivered_to,
            });
    }
}

fn task_failed_alert(rule: &AlertRule, event: &AlertEvent) -> Alert {
    let subject = if event.task_title.is_empty() {
        event.task_id.clone()
    } else {
        event.task_title.clone()
    };
    Alert::new(
        rule.rule_type.to_string(),
        rule.severity,
        "Task failed",
        format!("{subject} failed: {}", event.error),
        event.alert_source(),
        event.project_path.clone(),
    )
    .with_metadata(event.metadata.clone())
}

fn consecutive_failures_alert(rule: &AlertRule, event: &AlertEvent, failures: i64) -> Alert {
    Alert::new(
        rule.rule_type.to_string(),
        rule.severity,
        "Consecutive failures",
        format!("{failures} consecutive failures in {}", event.project_path),
        event.alert_source(),
        event.project_path.clone(),
    )
    .with_metadata(event.metadata.clone())
}

fn escalation_alert(rule: &AlertRule, event: &AlertEvent, retries: i64) -> Alert {
    let source = event.retry_source();
    let mut alert = Alert::new(
        rule.rule_type.to_string(),
        // Escalations page someone regardless of the configured severity.
        Severity::Critical,
        "Escalation",
        format!("{source} has failed {retries} times and needs attention"),
        event.alert_source(),
        event.project_path.clone(),
    )
    .with_metadata(event.metadata.clone());
    alert
        .metadata
        .insert("retry_count".to_string(), retries.to_string());
    alert
        .metadata
        .insert("escalation_source".to_string(), source);
    alert
}

/// An `escalation` event bypasses the rule set entirely.
fn escalation_event_alert(event: &AlertEvent) -> (AlertRule, Alert) {
    let trips = event
        .metadata
        .get("trip_count")
        .cloned()
        .unwrap_or_else(|| "?".into());
    let cause = event
        .metadata
        .get("last_cause")
        .cloned()
        .unwrap_or_else(|| event.error.clone());
    let alert = Alert::new(
        "escalation",
        Severity::Critical,
        "Escalation",
        format!("escalation tripped {trips} time(s); last cause: {cause}"),
        event.alert_source(),
        event.project_path.clone(),
    )
    .with_metadata(event.metadata.clone());
    let rule = AlertRule::new("escalation", RuleType::Escalation).with_severity(Severity::Critical);
    (rule, alert)
}

fn rule_alert(rule: &AlertRule, event: &AlertEvent, title: &str, message: String) -> Alert {
    Alert::new(
        rule.rule_type.to_string(),
        rule.severity,
        title,
        message,
        event.alert_source(),
        event.project_path.clone(),
    )
    .with_metadata(event.metadata.clone())
}

fn stuck_alert(
    rule: &AlertRule,
    task_id: &str,
    progress: &TaskProgress,
    stalled_min: i64,
) -> Alert {
    let mut alert = Alert::new(
        rule.rule_type.to_string(),
        rule.severity,
        "Task stuck",
        format!(
            "task {task_id} has made no progress for {stalled_min} minutes (phase {}, {}%)",
            progress.phase, progress.progress
        ),
        format!("task:{task_id}"),
        String::new(),
    );
    alert
        .metadata
        .insert("stalled_minutes".to_string(), stalled_min.to_string());
    alert
        .metadata
        .insert("phase".to_string(), progress.phase.clone());
    alert
}
