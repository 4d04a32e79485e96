use crate::error::{Result, RunError};
use crate::log_sink::Logger;
use regex::Regex;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::Level;

/// Scanner cli executable, resolved through PATH
pub const SCANNER_BINARY: &str = "sonar-scanner";

/// Optional timestamp, then a severity tag followed by `:`, whitespace or end of line
static SEVERITY_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:\d{4}-\d{2}-\d{2}[T ])?\d{2}:\d{2}:\d{2}(?:[.,]\d+)?\s+)?(DEBUG|INFO|WARN|ERROR)(?::\s*|\s+|$)(.*)$",
    )
    .expect("severity regex is valid")
});

/// Everything needed to build the sonar-scanner argument list
#[derive(Debug, Clone, Default)]
pub struct ScannerCommand {
    pub working_dir: PathBuf,
    pub metadata_file_path: PathBuf,
    /// Usually the local proxy, not the real sonar host
    pub host_url: String,
    pub project_settings: Option<PathBuf>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub verbose: bool,
}

impl ScannerCommand {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            format!("-Dsonar.working.directory={}", self.working_dir.display()),
            format!(
                "-Dsonar.scanner.metadataFilePath={}",
                self.metadata_file_path.display()
            ),
            format!("-Dsonar.host.url={}", self.host_url),
        ];

        if let Some(settings) = &self.project_settings {
            args.push(format!("-Dproject.settings={}", settings.display()));
        }

        if let Some(login) = self.login.as_deref().filter(|l| !l.is_empty()) {
            args.push(format!("-Dsonar.login={}", login));

            if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
                args.push(format!("-Dsonar.password={}", password));
            }
        }

        if self.verbose {
            args.push("-X".to_string());
        }

        args
    }
}

/// Properties whose values never reach the log
const SECRET_PROPERTIES: [&str; 2] = ["-Dsonar.login=", "-Dsonar.password="];

/// Argument list safe for logging, with credential values masked
pub fn redacted_args(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            match SECRET_PROPERTIES
                .iter()
                .find(|prefix| arg.starts_with(**prefix))
            {
                Some(prefix) => format!("{}****", prefix),
                None => arg.clone(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a scanner output line into the severity it announces and the rest of the message.
/// Lines without a tag keep `default` and their full text.
pub fn relevel_line(line: &str, default: Level) -> (Level, &str) {
    let Some(caps) = SEVERITY_TAG.captures(line) else {
        return (default, line);
    };

    let level = match &caps[1] {
        "DEBUG" => Level::DEBUG,
        "INFO" => Level::INFO,
        "WARN" => Level::WARN,
        _ => Level::ERROR,
    };
    let message = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    (level, message)
}

/// Runs an external analysis binary and forwards its output to the log
pub struct ProcessSupervisor {
    program: OsString,
    log: Logger,
}

impl ProcessSupervisor {
    pub fn new(program: impl Into<OsString>, log: Logger) -> Self {
        Self {
            program: program.into(),
            log,
        }
    }

    /// Run to completion. Output is fully drained before the exit status is checked.
    pub async fn run(&self, args: &[String]) -> Result<()> {
        let program = self.program.to_string_lossy().into_owned();
        self.log
            .debug(format!("Running {} {}", program, redacted_args(args)));

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunError::Process(format!("failed to start {}: {}", program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunError::Process("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunError::Process("stderr was not captured".to_string()))?;

        let stdout_task = tokio::spawn(redirect_output(stdout, Level::INFO, self.log.clone()));
        let stderr_task = tokio::spawn(redirect_output(stderr, Level::WARN, self.log.clone()));

        let (stdout_result, stderr_result) = tokio::join!(stdout_task, stderr_task);
        for result in [stdout_result, stderr_result] {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.log.warn(format!("Failed to read {} output: {}", program, e)),
                Err(e) => self.log.warn(format!("Output reader for {} panicked: {}", program, e)),
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| RunError::Process(format!("failed to wait for {}: {}", program, e)))?;

        if !status.success() {
            return Err(RunError::Process(format!("{} exited with {}", program, status)));
        }

        Ok(())
    }
}

async fn redirect_output<R>(reader: R, default: Level, log: Logger) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        // the scanner is not guaranteed to write valid UTF-8
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\r', '\n']);
        let (level, message) = relevel_line(line, default);
        log.log(level, message);
    }
}
