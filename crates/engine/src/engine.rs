use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use alerts::{AlertEngine, AlertEvent, AlertEventKind};
use chrono::Utc;
use db::{
    DBService,
    models::{
        execution::{Execution, ExecutionPhase, ExecutionStatus},
        project::Project,
    },
};
use futures::StreamExt;
use sandbox::{ContainerId, CreateContainerRequest, NetworkPolicy, SandboxDriver};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    EngineError, config::EngineConfig, outcome::StreamOutcome, progress::ProgressUpdate, prompt,
};

/// Capacity of the progress broadcaster. Emission never blocks; updates
/// beyond a slow consumer are dropped, never reordered.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub prompt: String,
    pub branch: Option<String>,
    pub external_task_id: Option<String>,
    pub priority: Option<i64>,
}

#[derive(Clone)]
struct RunningHandle {
    cancel: CancellationToken,
    container_id: Arc<Mutex<Option<ContainerId>>>,
}

enum RunResult {
    Completed,
    Cancelled,
    TimedOut,
    Failed(String),
}

struct Inner {
    db: DBService,
    driver: Arc<dyn SandboxDriver>,
    config: EngineConfig,
    active: RwLock<HashMap<Uuid, RunningHandle>>,
    progress_tx: mpsc::Sender<ProgressUpdate>,
    progress_rx: Mutex<Option<mpsc::Receiver<ProgressUpdate>>>,
    alerts: Option<AlertEngine>,
    shutdown: CancellationToken,
}

/// Admission, capacity gating, and supervision of sandboxed executions.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<Inner>,
}

impl ExecutionEngine {
    pub fn new(
        db: DBService,
        driver: Arc<dyn SandboxDriver>,
        config: EngineConfig,
        alerts: Option<AlertEngine>,
    ) -> Self {
        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        ExecutionEngine {
            inner: Arc::new(Inner {
                db,
                driver,
                config,
                active: RwLock::new(HashMap::new()),
                progress_tx,
                progress_rx: Mutex::new(Some(progress_rx)),
                alerts,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Admit a request: persist it as `queued` and attempt to start it
    /// immediately. Returns the queued snapshot without awaiting the run.
    ///
    /// Membership, role, and quota checks belong to the caller.
    pub async fn submit(&self, request: ExecutionRequest) -> Result<Execution, EngineError> {
        if request.prompt.trim().is_empty() {
            return Err(EngineError::Validation("prompt must not be empty".into()));
        }
        let exec = Execution::new(
            request.tenant_id,
            request.project_id,
            request.prompt,
            request.branch,
            request.external_task_id,
            request.priority.unwrap_or(0),
        );
        Execution::create(&self.inner.db.pool, &exec).await?;
        self.try_admit(exec.clone());
        Ok(exec)
    }

    pub async fn get(&self, id: Uuid) -> Result<Execution, EngineError> {
        Execution::find_by_id(&self.inner.db.pool, id)
            .await?
            .ok_or(EngineError::NotFound)
    }

    pub async fn list_by_tenant(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Execution>, EngineError> {
        Ok(Execution::list_by_tenant(&self.inner.db.pool, tenant_id, limit, offset).await?)
    }

    pub async fn list_by_project(
        &self,
        project_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Execution>, EngineError> {
        Ok(Execution::list_by_project(&self.inner.db.pool, project_id, limit, offset).await?)
    }

    pub async fn queue_depth(&self) -> Result<i64, EngineError> {
        Ok(Execution::count_by_status(&self.inner.db.pool, ExecutionStatus::Queued).await?)
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.read().unwrap().len()
    }

    /// The progress stream. Single consumer; can be taken once.
    pub fn progress_updates(&self) -> Option<mpsc::Receiver<ProgressUpdate>> {
        self.inner.progress_rx.lock().unwrap().take()
    }

    /// Cancel a running execution: trip its token and tear the container
    /// down early. The supervisor observes the cancellation and records
    /// the terminal state.
    pub async fn cancel(&self, id: Uuid) -> Result<(), EngineError> {
        let handle = self.inner.active.read().unwrap().get(&id).cloned();
        let Some(handle) = handle else {
            return Err(EngineError::NotRunning);
        };
        handle.cancel.cancel();
        let container = handle.container_id.lock().unwrap().clone();
        if let Some(container_id) = container {
            self.inner.driver.destroy(&container_id).await;
        }
        Ok(())
    }

    /// Spawn the queue processor.
    pub fn start(&self) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.inner.config.queue_poll_interval);
            loop {
                tokio::select! {
                    _ = engine.inner.shutdown.cancelled() => break,
                    _ = interval.tick() => engine.process_queue().await,
                }
            }
        })
    }

    pub fn stop(&self) {
        self.inner.shutdown.cancel();
    }

    /// Restart recovery: reap rows left in `running` by a previous
    /// instance, then re-admit the queued backlog.
    pub async fn recover(&self) -> Result<(), EngineError> {
        let orphans =
            Execution::list_by_status(&self.inner.db.pool, ExecutionStatus::Running).await?;
        for mut exec in orphans {
            if self.inner.active.read().unwrap().contains_key(&exec.id) {
                continue;
            }
            exec.status = ExecutionStatus::Failed;
            exec.error = Some("control plane restarted".to_string());
            exec.completed_at = Some(Utc::now());
            if let Err(e) = Execution::update(&self.inner.db.pool, &exec).await {
                tracing::error!("failed to reap orphaned execution {}: {e}", exec.id);
            } else {
                tracing::warn!("reaped orphaned execution {} to failed", exec.id);
            }
        }
        self.process_queue().await;
        Ok(())
    }

    /// Claim queued rows up to the free capacity and admit them.
    pub async fn process_queue(&self) {
        let free = {
            let active = self.inner.active.read().unwrap();
            self.inner.config.max_concurrent.saturating_sub(active.len())
        };
        if free == 0 {
            return;
        }
        match Execution::claim_queued(&self.inner.db.pool, free as i64).await {
            Ok(claimed) => {
                for exec in claimed {
                    self.try_admit(exec);
                }
            }
            Err(e) => tracing::error!("queue claim failed: {e}"),
        }
    }

    /// The capacity gate. Inserts into the running set and spawns the
    /// supervisor when a slot is free; otherwise the execution stays
    /// queued for the queue processor.
    fn try_admit(&self, exec: Execution) -> bool {
        let handle = {
            let mut active = self.inner.active.write().unwrap();
            if active.len() >= self.inner.config.max_concurrent
                || active.contains_key(&exec.id)
            {
                return false;
            }
            let handle = RunningHandle {
                cancel: self.inner.shutdown.child_token(),
                container_id: Arc::new(Mutex::new(None)),
            };
            active.insert(exec.id, handle.clone());
            handle
        };

        let engine = self.clone();
        tokio::spawn(async move { engine.supervise(exec, handle).await });
        true
    }

    /// One supervisor per running execution; owns the whole lifecycle
    /// from `running` to a terminal state.
    async fn supervise(self, mut exec: Execution, handle: RunningHandle) {
        let started_at = Utc::now();
        exec.status = ExecutionStatus::Running;
        exec.started_at = Some(started_at);
        self.set_phase(&mut exec, ExecutionPhase::Starting, 5, "Starting execution")
            .await;
        self.emit_alert(
            AlertEvent::new(AlertEventKind::TaskStarted)
                .with_task(exec.id.to_string(), self.task_title(&exec))
                .with_project(exec.project_id.to_string())
                .with_phase(exec.phase.to_string(), exec.progress),
        );

        let deadline = self.inner.config.limits.max_duration;
        let result = tokio::select! {
            _ = handle.cancel.cancelled() => RunResult::Cancelled,
            run = tokio::time::timeout(deadline, self.run_execution(&mut exec, &handle)) => {
                match run {
                    Err(_) => RunResult::TimedOut,
                    Ok(Ok(())) => RunResult::Completed,
                    Ok(Err(e)) => RunResult::Failed(e.to_string()),
                }
            }
        };

        // Cleanup on every exit path; destroy is idempotent, so racing
        // with `cancel` is fine.
        let container = handle.container_id.lock().unwrap().clone();
        if let Some(container_id) = container {
            self.inner.driver.destroy(&container_id).await;
        }

        let completed_at = Utc::now();
        exec.completed_at = Some(completed_at);
        exec.duration_ms = (completed_at - started_at).num_milliseconds();
        match result {
            RunResult::Completed => exec.status = ExecutionStatus::Completed,
            RunResult::Cancelled => {
                exec.status = ExecutionStatus::Cancelled;
                exec.error = Some("execution cancelled".to_string());
            }
            RunResult::TimedOut => {
                exec.status = ExecutionStatus::Timeout;
                exec.error = Some("execution timed out".to_string());
            }
            RunResult::Failed(message) => {
                exec.status = ExecutionStatus::Failed;
                exec.error = Some(message);
            }
        }
        self.set_phase(&mut exec, ExecutionPhase::Completed, 100, "Execution complete")
            .await;

        match exec.status {
            ExecutionStatus::Completed => {
                self.emit_alert(
                    AlertEvent::new(AlertEventKind::TaskCompleted)
                        .with_task(exec.id.to_string(), self.task_title(&exec))
                        .with_project(exec.project_id.to_string()),
                );
                if exec.cost_cents > 0 {
                    self.emit_alert(
                        AlertEvent::new(AlertEventKind::CostUpdate)
                            .with_task(exec.id.to_string(), self.task_title(&exec))
                            .with_project(exec.project_id.to_string())
                            .with_meta(
                                "task_cost_usd",
                                format!("{:.4}", exec.cost_cents as f64 / 100.0),
                            ),
                    );
                }
            }
            // A user-initiated cancel is not a failure signal.
            ExecutionStatus::Cancelled => {}
            _ => {
                self.emit_alert(
                    AlertEvent::new(AlertEventKind::TaskFailed)
                        .with_task(exec.id.to_string(), self.task_title(&exec))
                        .with_project(exec.project_id.to_string())
                        .with_error(exec.error.clone().unwrap_or_default()),
                );
            }
        }

        self.inner.active.write().unwrap().remove(&exec.id);
    }

    async fn run_execution(
        &self,
        exec: &mut Execution,
        handle: &RunningHandle,
    ) -> Result<(), EngineError> {
        let project = Project::find_by_id(&self.inner.db.pool, exec.project_id)
            .await?
            .ok_or_else(|| EngineError::Validation("project not found".into()))?;

        let container_id = self
            .inner
            .driver
            .create_container(&CreateContainerRequest {
                execution_id: exec.id,
                image: self.inner.config.image.clone(),
                memory_mb: self.inner.config.limits.memory_mb,
                cpus: self.inner.config.limits.cpus,
                network_policy: NetworkPolicy::Restricted,
                env: self.inner.config.env.clone(),
            })
            .await?;
        *handle.container_id.lock().unwrap() = Some(container_id.clone());

        self.set_phase(exec, ExecutionPhase::Branching, 10, "Setting up workspace")
            .await;
        let setup = prompt::build_setup_command(
            &project.repo_url,
            exec.branch.as_deref(),
            &project.default_branch,
            project.setup_script.as_deref(),
        );
        let setup_out = self.inner.driver.exec(&container_id, &setup).await?;
        if setup_out.exit_code != 0 {
            return Err(EngineError::Setup(format!(
                "exit {}: {}",
                setup_out.exit_code,
                utils::text::truncate(setup_out.stderr.trim(), 500)
            )));
        }

        self.set_phase(exec, ExecutionPhase::Exploring, 20, "Running model")
            .await;
        let command = prompt::build_model_command(&exec.prompt, project.navigator_enabled);
        let mut lines = self.inner.driver.exec_streaming(&container_id, &command).await?;
        let mut outcome = StreamOutcome::default();
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => outcome.observe_line(&line),
                Err(e) => tracing::debug!("model output stream error: {e}"),
            }
        }

        let rev = self
            .inner
            .driver
            .exec(&container_id, "cd /workspace/repo && git rev-parse HEAD")
            .await?;
        if rev.exit_code == 0 {
            let sha = rev.stdout.trim();
            if !sha.is_empty() {
                exec.commit_sha = Some(sha.to_string());
            }
        }

        exec.output = outcome.result.take();
        exec.pr_url = outcome.pr_url.take();
        exec.tokens_used = outcome.tokens_used;
        exec.cost_cents = outcome.cost_cents();
        Ok(())
    }

    /// Advance phase/progress, persist best-effort, and broadcast.
    async fn set_phase(
        &self,
        exec: &mut Execution,
        phase: ExecutionPhase,
        progress: i64,
        message: &str,
    ) {
        exec.phase = phase;
        exec.progress = progress;
        if let Err(e) = Execution::update(&self.inner.db.pool, exec).await {
            // In-memory state is authoritative for telemetry.
            tracing::error!("failed to persist execution {}: {e}", exec.id);
        }
        let update = ProgressUpdate {
            execution_id: exec.id,
            phase,
            progress,
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        // Drop-newest: losing a progress line beats slowing the supervisor.
        let _ = self.inner.progress_tx.try_send(update);

        if !matches!(phase, ExecutionPhase::Starting | ExecutionPhase::Completed) {
            self.emit_alert(
                AlertEvent::new(AlertEventKind::TaskProgress)
                    .with_task(exec.id.to_string(), self.task_title(&exec))
                    .with_project(exec.project_id.to_string())
                    .with_phase(phase.to_string(), progress),
            );
        }
    }

    fn task_title(&self, exec: &Execution) -> String {
        utils::text::truncate(&exec.prompt, 80)
    }

    fn emit_alert(&self, event: AlertEvent) {
        if let Some(alerts) = &self.inner.alerts {
            alerts.process_event(event);
        }
    }
}
