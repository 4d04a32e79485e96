use std::fmt;
use std::str::FromStr;

/// Raised when a status string from the server is not part of the known set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusParseError {
    #[error("unexpected task status '{0}'")]
    Task(String),
    #[error("unexpected analysis status '{0}'")]
    Analysis(String),
}

/// State of the server-side analysis task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskStatus {
    /// Sentinel for error paths, never sent by the server
    #[default]
    Undefined,
    Pending,
    InProgress,
    Success,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether the poller should stop once it sees this status
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undefined => "UNDEFINED",
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = StatusParseError;

    /// `UNDEFINED` is rejected too: the server never reports it
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(StatusParseError::Task(other.to_string())),
        }
    }
}

/// Quality gate verdict for a finished analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisStatus {
    #[default]
    Undefined,
    Ok,
    Warning,
    Error,
    /// No quality gate is configured for the project
    None,
}

impl AnalysisStatus {
    /// Only `ERROR` fails the run
    pub fn is_failing(self) -> bool {
        self == Self::Error
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undefined => "UNDEFINED",
            Self::Ok => "OK",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
            Self::None => "NONE",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(Self::Ok),
            "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "NONE" => Ok(Self::None),
            other => Err(StatusParseError::Analysis(other.to_string())),
        }
    }
}

/// Combined outcome of a run that waited for the quality gate.
/// `analysis_status` is only meaningful when `task_status` is `Success`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProjectAnalysisStatus {
    pub task_status: TaskStatus,
    pub analysis_status: AnalysisStatus,
}

impl ProjectAnalysisStatus {
    /// The task succeeded and the quality gate did not fail
    pub fn passed(&self) -> bool {
        self.task_status == TaskStatus::Success && !self.analysis_status.is_failing()
    }
}
