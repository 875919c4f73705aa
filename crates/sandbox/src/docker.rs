use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::{io::AsyncReadExt, process::Command, sync::mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::{
    ContainerId, CreateContainerRequest, ExecOutput, LineStream, NetworkPolicy, SandboxDriver,
    SandboxError,
};

/// Docker-CLI backed driver.
///
/// The restricted egress policy maps to a named docker network whose
/// firewall admits only [`crate::RESTRICTED_EGRESS_DOMAINS`]; the network
/// itself is provisioned by the operator, the driver only selects it.
pub struct DockerDriver {
    docker_bin: String,
    restricted_network: String,
}

impl Default for DockerDriver {
    fn default() -> Self {
        Self::new("docker", "pilot-restricted")
    }
}

impl DockerDriver {
    pub fn new(docker_bin: impl Into<String>, restricted_network: impl Into<String>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            restricted_network: restricted_network.into(),
        }
    }

    fn network_arg(&self, policy: NetworkPolicy) -> String {
        match policy {
            NetworkPolicy::Restricted => self.restricted_network.clone(),
            NetworkPolicy::Open => "bridge".to_string(),
            NetworkPolicy::None => "none".to_string(),
        }
    }

    async fn run_docker(&self, args: &[String]) -> Result<ExecOutput, SandboxError> {
        let output = Command::new(&self.docker_bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| SandboxError::Spawn {
                command: format!("{} {}", self.docker_bin, args.join(" ")),
                source,
            })?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1) as i64,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[async_trait]
impl SandboxDriver for DockerDriver {
    async fn create_container(
        &self,
        req: &CreateContainerRequest,
    ) -> Result<ContainerId, SandboxError> {
        let name = format!("pilot-exec-{}", req.execution_id);
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            name,
            "--label".into(),
            format!("pilot.execution={}", req.execution_id),
            "--memory".into(),
            format!("{}m", req.memory_mb),
            "--cpus".into(),
            format!("{}", req.cpus),
            "--network".into(),
            self.network_arg(req.network_policy),
            "--workdir".into(),
            "/workspace".into(),
        ];
        for (key, value) in &req.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.push(req.image.clone());
        // Keep the container alive; work happens through exec.
        args.push("sleep".into());
        args.push("infinity".into());

        let out = self.run_docker(&args).await?;
        if out.exit_code != 0 {
            return Err(SandboxError::Runtime(format!(
                "docker run exited with {}: {}",
                out.exit_code,
                out.stderr.trim()
            )));
        }
        Ok(out.stdout.trim().to_string())
    }

    async fn exec(&self, container_id: &str, command: &str) -> Result<ExecOutput, SandboxError> {
        self.run_docker(&[
            "exec".into(),
            container_id.to_string(),
            "/bin/sh".into(),
            "-lc".into(),
            command.to_string(),
        ])
        .await
    }

    async fn exec_streaming(
        &self,
        container_id: &str,
        command: &str,
    ) -> Result<LineStream, SandboxError> {
        let mut child = Command::new(&self.docker_bin)
            .args(["exec", container_id, "/bin/sh", "-lc", command])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                command: format!("{} exec {container_id}", self.docker_bin),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Runtime("exec stdout was not piped".to_string()))?;
        let mut stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel::<std::io::Result<String>>(64);
        tokio::spawn(async move {
            let mut lines = FramedRead::new(stdout, LinesCodec::new());
            while let Some(next) = lines.next().await {
                let item = next
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e));
                if tx.send(item).await.is_err() {
                    break;
                }
            }
            // Drain stderr for diagnostics, then reap the child.
            if let Some(stderr) = stderr.as_mut() {
                let mut buf = String::new();
                if stderr.read_to_string(&mut buf).await.is_ok() && !buf.trim().is_empty() {
                    tracing::debug!("sandbox exec stderr: {}", buf.trim());
                }
            }
            match child.wait().await {
                Ok(status) if !status.success() => {
                    tracing::debug!("sandbox exec exited with {status}");
                }
                Err(e) => tracing::debug!("sandbox exec wait failed: {e}"),
                _ => {}
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn destroy(&self, container_id: &str) {
        match self
            .run_docker(&["rm".into(), "-f".into(), container_id.to_string()])
            .await
        {
            Ok(out) if out.exit_code != 0 => {
                tracing::debug!(
                    "destroy {container_id}: docker rm exited with {}: {}",
                    out.exit_code,
                    out.stderr.trim()
                );
            }
            Err(e) => tracing::debug!("destroy {container_id}: {e}"),
            _ => {}
        }
    }
}
