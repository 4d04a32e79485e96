use crate::api::Credentials;
use crate::cli::Cli;
use crate::error::{Result, RunError};
use crate::properties::ProjectProperties;
use std::path::PathBuf;

/// Settings for one scanner run, fixed for its whole lifetime
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// May be left out when the project file names the host
    pub host_url: Option<String>,
    /// Extra PEM certificate to trust for the sonar host
    pub host_certificate: Option<String>,
    pub tls_skip_verify: bool,
    pub login: Option<String>,
    pub password: Option<String>,
    pub project_file: Option<PathBuf>,
    pub scanner_working_dir: PathBuf,
    pub metadata_file_name: String,
    pub proxy_listen_addr: String,
    /// Ask the scanner for debug output
    pub verbose: bool,
}

/// Server location and credentials after merging the project file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host_url: String,
    pub credentials: Option<Credentials>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl RunConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            host_url: cli.sonar_host_url.clone(),
            host_certificate: cli.sonar_host_cert.clone(),
            tls_skip_verify: cli.tls_skip_verify,
            login: cli.sonar_login.clone(),
            password: cli.sonar_password.clone(),
            project_file: cli.project_file_location.clone(),
            scanner_working_dir: cli.scanner_working_dir.clone(),
            metadata_file_name: cli.metadata_file_name.clone(),
            proxy_listen_addr: cli.proxy_listen_addr.clone(),
            verbose: cli.verbose(),
        }
    }

    /// Where the scanner writes its report file
    pub fn metadata_file_path(&self) -> PathBuf {
        self.scanner_working_dir.join(&self.metadata_file_name)
    }

    /// Merge the project file under the explicit settings.
    ///
    /// The explicit host url wins. A configured login replaces both login and password from the
    /// project file, so credentials are never mixed across sources.
    pub fn resolve(&self, project: Option<&ProjectProperties>) -> Result<ServerSettings> {
        let host_url = non_empty(&self.host_url)
            .or_else(|| project.and_then(|p| non_empty(&p.host_url)))
            .ok_or_else(|| RunError::Configuration("could not infer the sonar host url".to_string()))?;

        let credentials = match non_empty(&self.login) {
            Some(login) => Credentials::new(Some(login), self.password.as_deref()),
            None => project.and_then(|p| Credentials::new(p.login.as_deref(), p.password.as_deref())),
        };

        Ok(ServerSettings {
            host_url: host_url.to_string(),
            credentials,
        })
    }
}
