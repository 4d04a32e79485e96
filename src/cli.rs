use crate::metadata::DEFAULT_METADATA_FILE_NAME;
use crate::proxy::DEFAULT_LISTEN_ADDR;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "sonar-scanner-runner")]
#[command(about = "Run sonar-scanner through a local TLS proxy and wait for the quality gate")]
#[command(version)]
pub struct Cli {
    /// Sonar server url (defaults to sonar.host.url from the project file)
    #[arg(long, env = "SONAR_HOST_URL")]
    pub sonar_host_url: Option<String>,

    /// PEM certificate trusted in addition to the system store
    #[arg(long, env = "SONAR_HOST_CERT", hide_env_values = true)]
    pub sonar_host_cert: Option<String>,

    /// Disable sonar host certificate verification
    #[arg(long, env = "TLS_SKIP_VERIFY", default_value_t = false, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub tls_skip_verify: bool,

    /// Location of sonar-project.properties
    #[arg(long, env = "PROJECT_FILE_LOCATION")]
    pub project_file_location: Option<PathBuf>,

    /// Sonar login or token
    #[arg(long, env = "SONAR_LOGIN", hide_env_values = true)]
    pub sonar_login: Option<String>,

    #[arg(long, env = "SONAR_PASSWORD", hide_env_values = true)]
    pub sonar_password: Option<String>,

    /// Wait for the analysis task and check the quality gate
    #[arg(long, env = "WAIT_FOR_QUALITY_GATE", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub wait_for_quality_gate: bool,

    /// How long to wait for the quality gate, e.g. 90s, 2m, 1m30s
    #[arg(long, env = "QUALITY_GATE_WAIT_TIMEOUT", default_value = "2m", value_parser = parse_duration)]
    pub quality_gate_wait_timeout: Duration,

    /// Log filter (trace, debug, info, warn, error or an env-filter directive)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Scanner working directory, also where the report file is written
    #[arg(long, env = "SCANNER_WORKING_DIR", default_value = "/opt/sonar-scanner-action/")]
    pub scanner_working_dir: PathBuf,

    #[arg(long, env = "METADATA_FILE_NAME", default_value = DEFAULT_METADATA_FILE_NAME)]
    pub metadata_file_name: String,

    /// Local address of the sonar host proxy
    #[arg(long, env = "PROXY_LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub proxy_listen_addr: String,
}

impl Cli {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.wait_for_quality_gate && self.quality_gate_wait_timeout.is_zero() {
            anyhow::bail!("quality gate wait timeout must be positive");
        }
        if self.metadata_file_name.trim().is_empty() {
            anyhow::bail!("--metadata-file-name may not be empty");
        }
        Ok(())
    }

    /// Pass -X to the scanner when we log at debug level or below
    pub fn verbose(&self) -> bool {
        let level = self.log_level.trim();
        level.eq_ignore_ascii_case("debug") || level.eq_ignore_ascii_case("trace")
    }
}

/// Parse `1h`, `2m`, `30s`, `500ms` and combinations such as `1m30s`. A bare number is seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = value;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in duration '{}'", value))?;
        if digits == 0 {
            return Err(format!("invalid duration '{}'", value));
        }
        let amount: u64 = rest[..digits]
            .parse()
            .map_err(|e| format!("invalid duration '{}': {}", value, e))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "ms" => Duration::from_millis(1),
            "s" => Duration::from_secs(1),
            "m" => Duration::from_secs(60),
            "h" => Duration::from_secs(3600),
            other => return Err(format!("unknown unit '{}' in duration '{}'", other, value)),
        };
        rest = &rest[unit_len..];

        let part = u32::try_from(amount)
            .ok()
            .and_then(|n| unit.checked_mul(n))
            .ok_or_else(|| format!("duration '{}' is too large", value))?;
        total += part;
    }

    Ok(total)
}
