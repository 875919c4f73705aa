use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use alerts::{
    Alert, AlertEngine, AlertEvent, AlertEventKind, AlertRule, Channel, RuleCondition, RuleType,
    Severity,
    channel::ChannelError,
    dispatcher::Dispatcher,
};
use async_trait::async_trait;

struct RecordingChannel {
    name: String,
    delivered: Arc<Mutex<Vec<Alert>>>,
}

impl RecordingChannel {
    fn new(name: &str) -> (Arc<Self>, Arc<Mutex<Vec<Alert>>>) {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                name: name.to_string(),
                delivered: delivered.clone(),
            }),
            delivered,
        )
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> &'static str {
        "recording"
    }
    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        self.delivered.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

fn failed_event(project: &str, task: &str) -> AlertEvent {
    AlertEvent::new(AlertEventKind::TaskFailed)
        .with_task(task, "task title")
        .with_project(project)
        .with_error("boom")
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

/// Settle long enough for any straggler event to be processed.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn engine_with(rules: Vec<AlertRule>, channel: Arc<dyn Channel>) -> AlertEngine {
    init_tracing();
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.register(channel);
    let engine = AlertEngine::new(rules, dispatcher);
    engine.start();
    engine
}

#[tokio::test]
async fn consecutive_failures_fire_exactly_once_at_threshold() {
    let (channel, delivered) = RecordingChannel::new("ops");
    let rule = AlertRule::new("streak", RuleType::ConsecutiveFailures)
        .with_severity(Severity::Critical)
        .with_channels(vec!["ops".to_string()])
        .with_condition(RuleCondition {
            consecutive_failures: Some(3),
            ..Default::default()
        });
    let engine = engine_with(vec![rule], channel);

    for task in ["t1", "t2", "t3"] {
        engine.process_event(failed_event("acme/api", task));
    }

    wait_for(|| !engine.alert_history().is_empty()).await;
    settle().await;

    let history = engine.alert_history();
    assert_eq!(history.len(), 1, "exactly one alert fires at the threshold");
    assert_eq!(history[0].rule_name, "streak");
    assert_eq!(history[0].delivered_to, vec!["ops".to_string()]);

    let alerts = delivered.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, "consecutive_failures");
    assert_eq!(alerts[0].severity, Severity::Critical);
    assert!(alerts[0].message.contains("3 consecutive failures"));

    engine.stop();
}

#[tokio::test]
async fn completion_resets_the_failure_streak() {
    let (channel, delivered) = RecordingChannel::new("ops");
    let rule = AlertRule::new("streak", RuleType::ConsecutiveFailures).with_condition(
        RuleCondition {
            consecutive_failures: Some(3),
            ..Default::default()
        },
    );
    let engine = engine_with(vec![rule], channel);

    engine.process_event(failed_event("acme/api", "t1"));
    engine.process_event(failed_event("acme/api", "t2"));
    engine.process_event(
        AlertEvent::new(AlertEventKind::TaskCompleted)
            .with_task("t3", "")
            .with_project("acme/api"),
    );
    engine.process_event(failed_event("acme/api", "t4"));

    settle().await;
    assert!(
        engine.alert_history().is_empty(),
        "a success for the project resets the consecutive counter"
    );
    assert!(delivered.lock().unwrap().is_empty());
    engine.stop();
}

#[tokio::test]
async fn cooldown_suppresses_the_second_fire() {
    let (channel, delivered) = RecordingChannel::new("ops");
    let rule = AlertRule::new("failures", RuleType::TaskFailed)
        .with_cooldown(Duration::from_secs(3600));
    let engine = engine_with(vec![rule], channel);

    engine.process_event(failed_event("acme/api", "t1"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.process_event(failed_event("acme/api", "t2"));

    wait_for(|| !engine.alert_history().is_empty()).await;
    settle().await;

    assert_eq!(engine.alert_history().len(), 1);
    assert_eq!(delivered.lock().unwrap().len(), 1);
    engine.stop();
}

#[tokio::test]
async fn escalation_fires_once_with_source_metadata() {
    let (channel, delivered) = RecordingChannel::new("pager");
    let rule = AlertRule::new("escalate", RuleType::Escalation)
        .with_severity(Severity::Warning) // forced critical on fire
        .with_cooldown(Duration::from_secs(3600))
        .with_condition(RuleCondition {
            escalation_retries: Some(3),
            ..Default::default()
        });
    let engine = engine_with(vec![rule], channel);

    for task in ["t1", "t2", "t3"] {
        engine.process_event(
            failed_event("acme/api", task).with_meta("source", "issue:GH-1"),
        );
    }

    wait_for(|| !engine.alert_history().is_empty()).await;
    settle().await;

    let alerts = delivered.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.alert_type, "escalation");
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.metadata.get("retry_count").map(String::as_str), Some("3"));
    assert_eq!(
        alert.metadata.get("escalation_source").map(String::as_str),
        Some("issue:GH-1")
    );
    engine.stop();
}

#[tokio::test]
async fn task_failed_rule_fires_per_failure_without_cooldown() {
    let (channel, delivered) = RecordingChannel::new("ops");
    let rule = AlertRule::new("failures", RuleType::TaskFailed);
    let engine = engine_with(vec![rule], channel);

    engine.process_event(failed_event("acme/api", "t1"));
    engine.process_event(failed_event("acme/api", "t2"));

    wait_for(|| engine.alert_history().len() == 2).await;
    let alerts = delivered.lock().unwrap();
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0].source, "task:t1");
    assert!(alerts[0].message.contains("boom"));
    engine.stop();
}

#[tokio::test]
async fn budget_rules_consult_spend_metadata() {
    let (channel, delivered) = RecordingChannel::new("ops");
    let daily = AlertRule::new("daily", RuleType::DailySpendExceeded).with_condition(
        RuleCondition {
            daily_spend_threshold: Some(10.0),
            ..Default::default()
        },
    );
    let total = AlertRule::new("total", RuleType::BudgetDepleted).with_condition(RuleCondition {
        budget_limit: Some(100.0),
        ..Default::default()
    });
    let engine = engine_with(vec![daily, total], channel);

    // Below both thresholds: nothing fires.
    engine.process_event(
        AlertEvent::new(AlertEventKind::CostUpdate)
            .with_meta("daily_spend", "9.99")
            .with_meta("total_spend", "50"),
    );
    settle().await;
    assert!(engine.alert_history().is_empty());

    engine.process_event(
        AlertEvent::new(AlertEventKind::BudgetExceeded)
            .with_meta("daily_spend", "12.50")
            .with_meta("total_spend", "150"),
    );
    wait_for(|| engine.alert_history().len() == 2).await;

    let alerts = delivered.lock().unwrap();
    let types: Vec<&str> = alerts.iter().map(|a| a.alert_type.as_str()).collect();
    assert!(types.contains(&"daily_spend_exceeded"));
    assert!(types.contains(&"budget_depleted"));
    engine.stop();
}

#[tokio::test]
async fn stuck_sweep_alerts_on_stalled_tasks() {
    let (channel, delivered) = RecordingChannel::new("ops");
    // Negative threshold so a just-updated task already counts as stalled.
    let rule = AlertRule::new("stuck", RuleType::TaskStuck).with_condition(RuleCondition {
        stuck_minutes: Some(-1),
        ..Default::default()
    });
    let engine = engine_with(vec![rule], channel);

    engine.process_event(
        AlertEvent::new(AlertEventKind::TaskStarted)
            .with_task("t1", "")
            .with_phase("exploring", 20),
    );
    wait_for(|| engine.task_progress("t1").is_some()).await;

    engine.sweep_stuck_tasks().await;
    let alerts = delivered.lock().unwrap().clone();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, "task_stuck");
    assert_eq!(alerts[0].source, "task:t1");

    // Completion clears the tracked task; nothing further fires.
    engine.process_event(AlertEvent::new(AlertEventKind::TaskCompleted).with_task("t1", ""));
    wait_for(|| engine.task_progress("t1").is_none()).await;
    engine.sweep_stuck_tasks().await;
    assert_eq!(delivered.lock().unwrap().len(), 1);
    engine.stop();
}

#[tokio::test]
async fn escalation_event_is_unconditionally_critical() {
    let (channel, delivered) = RecordingChannel::new("pager");
    let engine = engine_with(Vec::new(), channel);

    engine.process_event(
        AlertEvent::new(AlertEventKind::Escalation)
            .with_project("acme/api")
            .with_meta("trip_count", "4")
            .with_meta("last_cause", "api rate limited"),
    );

    wait_for(|| !engine.alert_history().is_empty()).await;
    let alerts = delivered.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::Critical);
    assert!(alerts[0].message.contains('4'));
    assert!(alerts[0].message.contains("api rate limited"));
    engine.stop();
}

#[tokio::test]
async fn security_events_fire_enabled_rules() {
    let (channel, delivered) = RecordingChannel::new("ops");
    let rules = vec![
        AlertRule::new("unauthorized", RuleType::UnauthorizedAccess)
            .with_severity(Severity::Critical),
        AlertRule::new("sensitive", RuleType::SensitiveFileModified),
    ];
    let engine = engine_with(rules, channel);

    engine.process_event(
        AlertEvent::new(AlertEventKind::SecurityEvent)
            .with_task("t1", "")
            .with_meta("file_path", "/etc/passwd"),
    );

    wait_for(|| engine.alert_history().len() == 2).await;
    let alerts = delivered.lock().unwrap();
    let sensitive = alerts
        .iter()
        .find(|a| a.alert_type == "sensitive_file_modified")
        .unwrap();
    assert!(sensitive.message.contains("/etc/passwd"));
    engine.stop();
}

#[tokio::test]
async fn autopilot_metrics_apply_matching_rule_types() {
    let (channel, delivered) = RecordingChannel::new("ops");
    let rules = vec![
        AlertRule::new("queue", RuleType::FailedQueueHigh).with_condition(RuleCondition {
            failed_queue_depth: Some(5),
            ..Default::default()
        }),
        AlertRule::new("breaker", RuleType::CircuitBreakerTrip),
        AlertRule::new("deadlock", RuleType::Deadlock).with_condition(RuleCondition {
            no_progress_minutes: Some(15),
            ..Default::default()
        }),
    ];
    let engine = engine_with(rules, channel);

    engine.process_event(
        AlertEvent::new(AlertEventKind::AutopilotMetrics)
            .with_meta("failed_queue_depth", "7")
            .with_meta("circuit_breaker_trips", "1")
            .with_meta("no_progress_minutes", "3"),
    );

    wait_for(|| engine.alert_history().len() == 2).await;
    settle().await;
    let alerts = delivered.lock().unwrap();
    let types: Vec<&str> = alerts.iter().map(|a| a.alert_type.as_str()).collect();
    assert!(types.contains(&"failed_queue_high"));
    assert!(types.contains(&"circuit_breaker_trip"));
    assert!(
        !types.contains(&"deadlock"),
        "below-threshold metrics must not fire"
    );
    engine.stop();
}

#[tokio::test]
async fn empty_rule_channels_target_severity_matching_channels() {
    let dispatcher = Arc::new(Dispatcher::new());
    let (critical_only, critical_deliveries) = RecordingChannel::new("critical-only");
    // Wrap with a severity filter via the trait default by using a newtype.
    struct Filtered(Arc<RecordingChannel>, Vec<Severity>);
    #[async_trait]
    impl Channel for Filtered {
        fn name(&self) -> &str {
            self.0.name()
        }
        fn kind(&self) -> &'static str {
            "recording"
        }
        fn severities(&self) -> &[Severity] {
            &self.1
        }
        async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
            self.0.send(alert).await
        }
    }
    dispatcher.register(Arc::new(Filtered(critical_only, vec![Severity::Critical])));
    let (open, open_deliveries) = RecordingChannel::new("open");
    dispatcher.register(open);

    let rule = AlertRule::new("failures", RuleType::TaskFailed).with_severity(Severity::Warning);
    let engine = AlertEngine::new(vec![rule], dispatcher);
    engine.start();

    engine.process_event(failed_event("acme/api", "t1"));
    wait_for(|| !engine.alert_history().is_empty()).await;
    settle().await;

    assert_eq!(open_deliveries.lock().unwrap().len(), 1);
    assert!(critical_deliveries.lock().unwrap().is_empty());

    let history = engine.alert_history();
    assert_eq!(history[0].delivered_to, vec!["open".to_string()]);
    engine.stop();
}
