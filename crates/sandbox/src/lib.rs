use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub mod docker;

pub use docker::DockerDriver;

/// Opaque handle to a created container.
pub type ContainerId = String;

/// Lazy sequence of UTF-8 stdout lines, closed on process exit.
pub type LineStream = futures::stream::BoxStream<'static, std::io::Result<String>>;

/// Egress domains reachable under the `restricted` network policy. All
/// other destinations are blocked by the sandbox network.
pub const RESTRICTED_EGRESS_DOMAINS: &[&str] = &[
    "github.com",
    "api.github.com",
    "linear.app",
    "api.linear.app",
    "*.atlassian.com",
    "registry.npmjs.org",
    "pypi.org",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkPolicy {
    /// Only [`RESTRICTED_EGRESS_DOMAINS`] are reachable.
    #[default]
    Restricted,
    /// Unrestricted egress.
    Open,
    /// No network at all.
    None,
}

#[derive(Debug, Clone)]
pub struct CreateContainerRequest {
    pub execution_id: Uuid,
    pub image: String,
    pub memory_mb: u64,
    pub cpus: f64,
    pub network_policy: NetworkPolicy,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("container runtime error: {0}")]
    Runtime(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Capability contract over the container runtime.
///
/// Memory and CPU limits are enforced by the runtime; `destroy` is
/// best-effort and idempotent.
#[async_trait]
pub trait SandboxDriver: Send + Sync {
    async fn create_container(
        &self,
        req: &CreateContainerRequest,
    ) -> Result<ContainerId, SandboxError>;

    /// Run a shell command to completion inside the container.
    async fn exec(&self, container_id: &str, command: &str) -> Result<ExecOutput, SandboxError>;

    /// Run a shell command and stream its stdout line by line.
    async fn exec_streaming(
        &self,
        container_id: &str,
        command: &str,
    ) -> Result<LineStream, SandboxError>;

    async fn destroy(&self, container_id: &str);
}
