//! The executor feeds the alerting engine: failures surface as alerts.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use alerts::{
    Alert, AlertEngine, AlertRule, Channel, RuleType, channel::ChannelError,
    dispatcher::Dispatcher,
};
use async_trait::async_trait;
use chrono::Utc;
use db::{DBService, models::project::Project};
use engine::{EngineConfig, ExecutionEngine, ExecutionRequest};
use sandbox::{
    ContainerId, CreateContainerRequest, ExecOutput, LineStream, SandboxDriver, SandboxError,
};
use uuid::Uuid;

struct FailingDriver;

#[async_trait]
impl SandboxDriver for FailingDriver {
    async fn create_container(
        &self,
        req: &CreateContainerRequest,
    ) -> Result<ContainerId, SandboxError> {
        Ok(format!("c-{}", req.execution_id))
    }
    async fn exec(&self, _c: &str, command: &str) -> Result<ExecOutput, SandboxError> {
        if command.starts_with("git clone") {
            return Ok(ExecOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "clone refused".to_string(),
            });
        }
        Ok(ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
    async fn exec_streaming(&self, _c: &str, _command: &str) -> Result<LineStream, SandboxError> {
        Ok(Box::pin(futures::stream::empty()))
    }
    async fn destroy(&self, _c: &str) {}
}

struct RecordingChannel(Arc<Mutex<Vec<Alert>>>);

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recorder"
    }
    fn kind(&self) -> &'static str {
        "recording"
    }
    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        self.0.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

#[tokio::test]
async fn execution_failure_raises_a_task_failed_alert() {
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.register(Arc::new(RecordingChannel(delivered.clone())));
    let alert_engine = AlertEngine::new(
        vec![AlertRule::new("failures", RuleType::TaskFailed)],
        dispatcher,
    );
    alert_engine.start();

    let db = DBService::new_in_memory().await.unwrap();
    let tenant = Uuid::new_v4();
    let project = Project {
        id: Uuid::new_v4(),
        tenant_id: tenant,
        name: "api".to_string(),
        repo_url: "https://github.com/acme/api.git".to_string(),
        default_branch: "main".to_string(),
        navigator_enabled: false,
        setup_script: None,
        created_at: Utc::now(),
    };
    Project::create(&db.pool, &project).await.unwrap();

    let exec_engine = ExecutionEngine::new(
        db,
        Arc::new(FailingDriver),
        EngineConfig::default(),
        Some(alert_engine.clone()),
    );
    exec_engine
        .submit(ExecutionRequest {
            tenant_id: tenant,
            project_id: project.id,
            prompt: "doomed".to_string(),
            branch: None,
            external_task_id: None,
            priority: None,
        })
        .await
        .unwrap();

    for _ in 0..500 {
        if !delivered.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let alerts = delivered.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, "task_failed");
    assert!(alerts[0].message.contains("workspace setup failed"));
    assert!(alerts[0].source.starts_with("task:"));
    alert_engine.stop();
}
