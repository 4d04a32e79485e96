use crate::status::StatusParseError;

/// Errors that abort a scanner run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Bad host url, missing host url or unusable certificate
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to start the sonar host proxy: {0}")]
    ProxyStart(String),

    /// sonar-scanner could not be spawned or exited unsuccessfully
    #[error("sonar-scanner failed: {0}")]
    Process(String),

    /// Transport failure, unexpected status code or content type
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("failed to parse server response: {0}")]
    Parse(String),

    /// The caller's deadline expired while waiting for the analysis task
    #[error("quality gate wait timeout")]
    WaitTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for RunError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<StatusParseError> for RunError {
    fn from(err: StatusParseError) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for RunError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RunError>;
