use crate::api::ServerClient;
use crate::config::{RunConfig, ServerSettings};
use crate::error::{Result, RunError};
use crate::log_sink::Logger;
use crate::metadata::MetadataRecord;
use crate::poller::{Deadline, TaskStatusPoller, DEFAULT_POLL_INTERVAL};
use crate::properties::ProjectProperties;
use crate::proxy::ReverseProxyBridge;
use crate::quality_gate::QualityGateEvaluator;
use crate::scanner::{ProcessSupervisor, ScannerCommand, SCANNER_BINARY};
use crate::status::{AnalysisStatus, ProjectAnalysisStatus, TaskStatus};
use crate::tls::TlsPolicy;
use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One sonar-scanner run: proxy, scanner process and optional quality gate wait
pub struct Run {
    config: RunConfig,
    settings: ServerSettings,
    tls: TlsPolicy,
    scanner_program: OsString,
    /// Arguments placed before the generated `-D` properties
    scanner_prefix: Vec<String>,
    poll_interval: Duration,
    log: Logger,
}

impl Run {
    /// Resolve the server settings and trust policy. Nothing is started yet.
    pub fn new(config: RunConfig, log: Logger) -> Result<Self> {
        let project = match &config.project_file {
            Some(path) => load_project_properties(path, &log)?,
            None => None,
        };
        let settings = config.resolve(project.as_ref())?;
        let tls = TlsPolicy::new(config.host_certificate.as_deref(), config.tls_skip_verify)?;
        if tls.skip_verify() {
            log.warn("Sonar host certificate verification is disabled");
        }

        Ok(Self {
            config,
            settings,
            tls,
            scanner_program: OsString::from(SCANNER_BINARY),
            scanner_prefix: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            log,
        })
    }

    #[cfg(test)]
    fn with_scanner(mut self, program: &str, prefix: &[&str]) -> Self {
        self.scanner_program = OsString::from(program);
        self.scanner_prefix = prefix.iter().map(|s| s.to_string()).collect();
        self
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run the scanner and, when `wait` is set, block until the quality gate is known or the
    /// timeout expires.
    ///
    /// The proxy lives for the whole call because the task url in the report file points at it.
    pub async fn execute(&self, wait: Option<Duration>) -> Result<Option<ProjectAnalysisStatus>> {
        let run_token = CancellationToken::new();
        let bridge = ReverseProxyBridge::new(
            &self.settings.host_url,
            &self.tls,
            self.log.scoped("sonar-host-proxy"),
        )?;
        let proxy = bridge
            .start(&self.config.proxy_listen_addr, run_token.clone())
            .await?;

        let result = self.run_stages(proxy.local_addr(), wait).await;

        run_token.cancel();
        let stopped = proxy.join(&self.log).await;

        let status = result?;
        stopped?;
        Ok(status)
    }

    async fn run_stages(
        &self,
        proxy_addr: SocketAddr,
        wait: Option<Duration>,
    ) -> Result<Option<ProjectAnalysisStatus>> {
        self.log.info("Running the sonar scanner cli ...");
        self.run_scanner(proxy_addr).await?;

        let Some(timeout) = wait else {
            return Ok(None);
        };

        self.log.info("Retrieving the project analysis status ...");
        self.retrieve_project_analysis_status(timeout).await.map(Some)
    }

    async fn run_scanner(&self, proxy_addr: SocketAddr) -> Result<()> {
        let command = ScannerCommand {
            working_dir: self.config.scanner_working_dir.clone(),
            metadata_file_path: self.config.metadata_file_path(),
            host_url: format!("http://{}", proxy_addr),
            project_settings: self.config.project_file.clone(),
            login: self.settings.credentials.as_ref().map(|c| c.login.clone()),
            password: self
                .settings
                .credentials
                .as_ref()
                .and_then(|c| c.password.clone()),
            verbose: self.config.verbose,
        };
        self.log.debug(format!(
            "Sonar-Scanner cli working directory: {}",
            command.working_dir.display()
        ));
        self.log.debug(format!(
            "Sonar-Scanner cli metadata file path: {}",
            command.metadata_file_path.display()
        ));

        let mut args = self.scanner_prefix.clone();
        args.extend(command.args());

        ProcessSupervisor::new(&self.scanner_program, self.log.scoped("sonar-scanner-cli"))
            .run(&args)
            .await
    }

    async fn retrieve_project_analysis_status(
        &self,
        timeout: Duration,
    ) -> Result<ProjectAnalysisStatus> {
        let metadata_path = self.config.metadata_file_path();
        self.log
            .info(format!("Using metadata file {}", metadata_path.display()));

        let record = MetadataRecord::load(&metadata_path)?;
        self.log
            .info(format!("Using task result url {}", record.task_url));
        if let Some(dashboard) = &record.dashboard_url {
            self.log.info(format!("Analysis dashboard: {}", dashboard));
        }

        let log = self.log.scoped("sonarqube");
        let client = ServerClient::new(&self.tls, self.settings.credentials.clone(), log.clone())?;

        let poller =
            TaskStatusPoller::new(client.clone(), log.clone()).with_interval(self.poll_interval);
        let deadline = Deadline::after(timeout);
        let task = poller
            .wait_for_task(&record.task_url, deadline.token())
            .await?;

        let mut status = ProjectAnalysisStatus {
            task_status: task.status,
            analysis_status: AnalysisStatus::Undefined,
        };
        if task.status != TaskStatus::Success {
            return Ok(status);
        }

        let analysis_id = task.analysis_id.ok_or_else(|| {
            RunError::Parse("analysis task succeeded without an analysisId".to_string())
        })?;

        self.log.info("Retrieving quality gate status");
        let evaluator = QualityGateEvaluator::new(client, self.settings.host_url.clone(), log);
        status.analysis_status = evaluator.evaluate(&analysis_id).await?;
        Ok(status)
    }
}

/// A missing or directory project file is not fatal, the scanner decides what to do with it
fn load_project_properties(path: &Path, log: &Logger) -> Result<Option<ProjectProperties>> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {
            log.error(format!(
                "Sonar scanner project file location {} points to a directory",
                path.display()
            ));
            Ok(None)
        }
        Ok(_) => {
            log.debug(format!("Reading project properties from {}", path.display()));
            ProjectProperties::load(path).map(Some)
        }
        Err(e) => {
            log.error(format!(
                "Could not open sonar scanner project file {}: {}",
                path.display(),
                e
            ));
            Ok(None)
        }
    }
}
