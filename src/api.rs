use crate::error::{Result, RunError};
use crate::log_sink::Logger;
use crate::tls::TlsPolicy;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Upper bound for a single API call
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Sonar login (or token) and optional password, sent as HTTP basic auth
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: Option<String>,
}

impl Credentials {
    /// `None` when no login is configured
    pub fn new(login: Option<&str>, password: Option<&str>) -> Option<Self> {
        let login = login.filter(|l| !l.is_empty())?;
        Some(Self {
            login: login.to_string(),
            password: password.filter(|p| !p.is_empty()).map(str::to_string),
        })
    }
}

/// Join a host url and an api endpoint with exactly one slash between them
pub fn api_url(host: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        host.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

/// Authenticated JSON client for the sonar web api
#[derive(Clone)]
pub struct ServerClient {
    client: reqwest::Client,
    credentials: Option<Credentials>,
    log: Logger,
}

impl ServerClient {
    pub fn new(tls: &TlsPolicy, credentials: Option<Credentials>, log: Logger) -> Result<Self> {
        let client = tls
            .client_builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RunError::Configuration(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            credentials,
            log,
        })
    }

    /// GET `url` and decode the JSON body.
    ///
    /// Anything but `200` with an `application/json` body is an [`RunError::Http`].
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut request = self.client.get(url);
        if let Some(credentials) = &self.credentials {
            self.log
                .debug(format!("Using basic auth for request {}", url));
            request = request.basic_auth(&credentials.login, credentials.password.as_deref());
        }

        let response = request.send().await?;
        check_response(&response)?;

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn check_response(response: &Response) -> Result<()> {
    let status = response.status();
    if status != StatusCode::OK {
        return Err(RunError::Http(format!(
            "server returned response with code {}",
            status.as_u16()
        )));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    if !mime.eq_ignore_ascii_case("application/json") {
        return Err(RunError::Http(format!(
            "unexpected response content-type '{}'",
            content_type
        )));
    }

    Ok(())
}
