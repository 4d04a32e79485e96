use crate::api::{api_url, ServerClient};
use crate::error::{Result, RunError};
use crate::log_sink::Logger;
use crate::status::AnalysisStatus;
use reqwest::Url;
use serde::Deserialize;

const PROJECT_STATUS_ENDPOINT: &str = "api/qualitygates/project_status";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectStatusResponse {
    project_status: ProjectStatusBody,
}

#[derive(Debug, Deserialize)]
struct ProjectStatusBody {
    status: String,
}

/// Fetches the quality gate verdict for a finished analysis
pub struct QualityGateEvaluator {
    client: ServerClient,
    host_url: String,
    log: Logger,
}

impl QualityGateEvaluator {
    pub fn new(client: ServerClient, host_url: impl Into<String>, log: Logger) -> Self {
        Self {
            client,
            host_url: host_url.into(),
            log,
        }
    }

    fn status_url(&self, analysis_id: &str) -> Result<Url> {
        let endpoint = api_url(&self.host_url, PROJECT_STATUS_ENDPOINT);
        let mut url = Url::parse(&endpoint).map_err(|e| {
            RunError::Configuration(format!("failed to parse sonar host url '{}': {}", self.host_url, e))
        })?;
        url.query_pairs_mut().append_pair("analysisId", analysis_id);
        Ok(url)
    }

    /// Single request, never retried
    pub async fn evaluate(&self, analysis_id: &str) -> Result<AnalysisStatus> {
        let url = self.status_url(analysis_id)?;
        self.log
            .debug(format!("Reading analysis status from {}", url));

        let response: ProjectStatusResponse = self.client.get_json(url.as_str()).await?;
        let status = response.project_status.status.parse::<AnalysisStatus>()?;

        self.log
            .debug(format!("Analysis status returned in response was '{}'", status));
        Ok(status)
    }
}
