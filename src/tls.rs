use crate::error::{Result, RunError};
use reqwest::{Certificate, ClientBuilder};

/// Trust policy for outbound connections to the sonar host.
///
/// The system trust store is always used. Extra PEM certificates may be added on top, and
/// verification can be switched off entirely.
#[derive(Clone)]
pub struct TlsPolicy {
    extra_roots: Vec<Certificate>,
    skip_verify: bool,
}

impl TlsPolicy {
    /// Every certificate in `certificate_pem` is trusted, not only the first one.
    pub fn new(certificate_pem: Option<&str>, skip_verify: bool) -> Result<Self> {
        let extra_roots = match certificate_pem.filter(|pem| !pem.trim().is_empty()) {
            Some(pem) => load_bundle(pem)?,
            None => Vec::new(),
        };

        Ok(Self {
            extra_roots,
            skip_verify,
        })
    }

    pub fn skip_verify(&self) -> bool {
        self.skip_verify
    }

    /// Client builder with the trust policy applied
    pub fn client_builder(&self) -> ClientBuilder {
        let mut builder = reqwest::Client::builder().danger_accept_invalid_certs(self.skip_verify);
        for cert in &self.extra_roots {
            builder = builder.add_root_certificate(cert.clone());
        }
        builder
    }
}

fn load_bundle(pem: &str) -> Result<Vec<Certificate>> {
    let certs = Certificate::from_pem_bundle(pem.as_bytes()).map_err(|e| {
        RunError::Configuration(format!(
            "failed to append the sonar host certificate to the cert pool: {}",
            e
        ))
    })?;
    if certs.is_empty() {
        return Err(RunError::Configuration(
            "failed to append the sonar host certificate to the cert pool: no certificate found"
                .to_string(),
        ));
    }
    Ok(certs)
}
