use crate::api::ServerClient;
use crate::error::{Result, RunError};
use crate::log_sink::Logger;
use crate::status::TaskStatus;
use serde::Deserialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pause between two task status requests
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct TaskResponse {
    task: TaskBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskBody {
    status: String,
    #[serde(default)]
    analysis_id: Option<String>,
}

/// Terminal state of a compute engine task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub analysis_id: Option<String>,
}

/// Cancellation token that fires by itself once `timeout` has elapsed
pub struct Deadline {
    token: CancellationToken,
    timer: JoinHandle<()>,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        let token = CancellationToken::new();
        let timer = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        };
        Self { token, timer }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Polls the task endpoint until the analysis task settles
pub struct TaskStatusPoller {
    client: ServerClient,
    interval: Duration,
    log: Logger,
}

impl TaskStatusPoller {
    pub fn new(client: ServerClient, log: Logger) -> Self {
        Self {
            client,
            interval: DEFAULT_POLL_INTERVAL,
            log,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll `task_url` until a terminal status.
    ///
    /// Returns [`RunError::WaitTimeout`] once `cancel` fires, whether the poller is sleeping or
    /// waiting on a request. HTTP and parse failures end the loop immediately.
    pub async fn wait_for_task(&self, task_url: &str, cancel: &CancellationToken) -> Result<TaskResult> {
        let mut status = TaskStatus::Pending;

        loop {
            self.log.debug("Reading task status from the server");

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RunError::WaitTimeout),
                result = self.request_task_status(task_url) => result?,
            };

            if result.status != status {
                self.log
                    .info(format!("Task status changed from {} to {}", status, result.status));
                status = result.status;
            }

            if status.is_terminal() {
                return Ok(result);
            }

            self.log
                .debug(format!("Waiting for {:?} before next poll", self.interval));

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RunError::WaitTimeout),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    async fn request_task_status(&self, task_url: &str) -> Result<TaskResult> {
        let response: TaskResponse = self.client.get_json(task_url).await?;
        let status = response.task.status.parse::<TaskStatus>()?;

        Ok(TaskResult {
            status,
            analysis_id: response.task.analysis_id.filter(|id| !id.is_empty()),
        })
    }
}
