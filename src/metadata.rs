use crate::error::{Result, RunError};
use std::fs;
use std::path::Path;

/// Name of the report file sonar-scanner writes after an analysis
pub const DEFAULT_METADATA_FILE_NAME: &str = "report-task.txt";

const TASK_URL_KEY: &str = "ceTaskUrl";
const DASHBOARD_URL_KEY: &str = "dashboardUrl";

/// Fields read from the scanner report file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    /// Endpoint to poll for the analysis task status
    pub task_url: String,
    pub dashboard_url: Option<String>,
}

impl MetadataRecord {
    /// Parse report file content. Only the first occurrence of each key counts.
    pub fn parse(content: &str) -> Result<Self> {
        let mut task_url = None;
        let mut dashboard_url = None;

        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                TASK_URL_KEY if task_url.is_none() => task_url = Some(value.to_string()),
                DASHBOARD_URL_KEY if dashboard_url.is_none() => {
                    dashboard_url = Some(value.to_string())
                }
                _ => {}
            }
        }

        let task_url = task_url.ok_or_else(|| {
            RunError::Parse("metadata file doesn't contain task url".to_string())
        })?;

        Ok(Self {
            task_url,
            dashboard_url,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }
}
