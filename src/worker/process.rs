//! Worker backed by an external command.
//!
//! Each evaluation spawns the configured command, writes a JSON request
//! to its stdin, and parses a JSON response from its stdout. The child is
//! killed if the call outlives its timeout.

use crate::errors::WorkerError;
use crate::worker::{TaskKind, Worker};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

pub struct ProcessWorker {
    cmd: String,
    args: Vec<String>,
    worker_model: String,
    critic_model: String,
    call_timeout: Duration,
}

impl ProcessWorker {
    pub fn new(
        cmd: impl Into<String>,
        args: Vec<String>,
        worker_model: impl Into<String>,
        critic_model: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            cmd: cmd.into(),
            args,
            worker_model: worker_model.into(),
            critic_model: critic_model.into(),
            call_timeout,
        }
    }

    fn model_for(&self, task: TaskKind) -> &str {
        if task.uses_critic_model() {
            &self.critic_model
        } else {
            &self.worker_model
        }
    }
}

#[async_trait]
impl Worker for ProcessWorker {
    async fn evaluate(&self, task: TaskKind, input: Value) -> Result<Value, WorkerError> {
        let request = json!({
            "task": task,
            "model": self.model_for(task),
            "input": input,
        });
        let payload = serde_json::to_vec(&request)
            .map_err(|e| WorkerError::Malformed(format!("request encoding failed: {}", e)))?;

        debug!(task = %task, cmd = %self.cmd, "spawning worker process");

        let mut child = Command::new(&self.cmd)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::Unavailable(format!("{}: {}", self.cmd, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| WorkerError::Unavailable(format!("stdin write failed: {}", e)))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| WorkerError::Unavailable(format!("stdin close failed: {}", e)))?;
        }

        let output = match timeout(self.call_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(WorkerError::Unavailable(format!("wait failed: {}", e)));
            }
            // Dropping the future kills the child (kill_on_drop).
            Err(_) => {
                warn!(task = %task, "worker call timed out after {:?}", self.call_timeout);
                return Err(WorkerError::Timeout);
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let snippet: String = stderr.chars().take(200).collect();
            return Err(WorkerError::Task(format!(
                "exit code {}: {}",
                output.status.code().unwrap_or(-1),
                snippet.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| WorkerError::Malformed(format!("response parse failed: {}", e)))
    }
}
