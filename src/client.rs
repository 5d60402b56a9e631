//! HTTP session wrapper for the CAROL probe and export endpoints.
//!
//! Two endpoints, two very different response shapes: the probe endpoint
//! returns a JSON count/row payload, the export endpoint returns a zip
//! archive streamed back with its real filename in `Content-Disposition`.
//! Both go through the same underlying `reqwest::Client` for connection
//! pooling.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::compiler::Payload;
use crate::config::Config;
use crate::error::{CarolError, Result};

/// A probe response's relevant fields. The server returns considerably
/// more than this; only the result count and, for small result sets, the
/// rows are interesting to this client.
#[derive(Debug, Deserialize)]
pub struct ProbeResponse {
    #[serde(rename = "ResultListCount")]
    pub result_list_count: u64,
    #[serde(rename = "MaxResultCountReached", default)]
    pub max_result_count_reached: bool,
}

/// A completed export: the bytes of the zip archive and the filename the
/// server suggested for it.
#[derive(Debug, Clone)]
pub struct ExportedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Thin session wrapper around a pooled `reqwest::Client`, configured the
/// way a desktop browser would be: a realistic `User-Agent` and a generous
/// timeout, since CAROL's own servers are not always fast to respond.
#[derive(Debug, Clone)]
pub struct CarolClient {
    http: Client,
    config: Config,
}

impl CarolClient {
    pub fn new(config: Config) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { http, config })
    }

    /// Submits `payload` to the probe endpoint and returns the result
    /// count (and, when small, the rows — not currently surfaced past the
    /// count since only the executor's export path needs row data).
    pub async fn probe(&self, payload: &Payload) -> Result<ProbeResponse> {
        debug!(url = %self.config.probe_url, "submitting probe");
        let response = self
            .http
            .post(&self.config.probe_url)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            warn!(%status, "probe endpoint returned non-success status");
            return Err(CarolError::Server {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| {
            error!(error = %e, "failed to parse probe response");
            CarolError::Json(e)
        })
    }

    /// Submits `payload` to the export endpoint and returns the resulting
    /// zip archive plus the filename the server suggested for it.
    pub async fn export(&self, payload: &Payload) -> Result<ExportedFile> {
        debug!(url = %self.config.export_url, "submitting export");
        let response = self
            .http
            .post(&self.config.export_url)
            .json(payload)
            .send()
            .await?;

        let filename = content_disposition_filename(&response)
            .unwrap_or_else(|| "export.zip".to_string());

        let bytes = response.bytes().await?.to_vec();
        Ok(ExportedFile { filename, bytes })
    }

    pub fn pacing_delay(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Probe => self.config.probe_pacing,
            RequestKind::Export => self.config.export_pacing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Probe,
    Export,
}

/// Parses the filename out of a `Content-Disposition: attachment;
/// filename=whatever.zip` header, stripping the `filename=` prefix and a
/// trailing `.zip` suffix.
fn content_disposition_filename(response: &reqwest::Response) -> Option<String> {
    let header = response.headers().get(reqwest::header::CONTENT_DISPOSITION)?;
    let value = header.to_str().ok()?;

    value.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix("filename=")
            .map(|name| name.trim_matches('"').trim_end_matches(".zip").to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_default_config() {
        let client = CarolClient::new(Config::default());
        assert!(client.is_ok());
    }

    #[test]
    fn pacing_delay_distinguishes_probe_and_export() {
        let config = Config::default();
        let probe_pacing = config.probe_pacing;
        let export_pacing = config.export_pacing;
        let client = CarolClient::new(config).unwrap();
        assert_eq!(client.pacing_delay(RequestKind::Probe), probe_pacing);
        assert_eq!(client.pacing_delay(RequestKind::Export), export_pacing);
    }
}
