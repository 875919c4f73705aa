use std::time::Duration;

/// Per-execution resource ceiling, enforced by the sandbox runtime and
/// the supervisor deadline.
#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    pub max_duration: Duration,
    pub memory_mb: u64,
    pub cpus: f64,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(30 * 60),
            memory_mb: 2048,
            cpus: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity gate: how many executions may run at once.
    pub max_concurrent: usize,
    /// Cadence of the queue processor.
    pub queue_poll_interval: Duration,
    /// Executor image; must satisfy the container contract (`/workspace`,
    /// `git`, the `claude` CLI, writable HOME).
    pub image: String,
    pub limits: ExecutionLimits,
    /// Environment passed into every container.
    pub env: Vec<(String, String)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            queue_poll_interval: Duration::from_secs(10),
            image: "pilot-executor:latest".to_string(),
            limits: ExecutionLimits::default(),
            env: Vec::new(),
        }
    }
}
