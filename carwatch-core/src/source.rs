//! Telemetry source: where snapshots come from.
//!
//! [`TelemetrySource`] is the seam the gatherer polls through.
//! [`HttpTelemetrySource`] implements it against the vehicle owner API:
//!
//! - `GET {base}/api/1/vehicles` lists the account's vehicles
//! - `GET {base}/api/1/vehicles/{id}/vehicle_data` returns one telemetry read

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::types::{Credentials, Snapshot, VehicleId};

/// Upstream provider of vehicle telemetry.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Maps each vehicle's display name to its id.
    async fn resolve_vehicles(&self, credentials: &Credentials)
        -> Result<HashMap<String, VehicleId>>;

    /// Fetches a single snapshot, giving up with [`Error::Timeout`] after `timeout`.
    async fn fetch_snapshot(
        &self,
        credentials: &Credentials,
        vehicle: &VehicleId,
        timeout: Duration,
    ) -> Result<Snapshot>;
}

/// Response from GET /api/1/vehicles
#[derive(Debug, Deserialize)]
struct VehicleList {
    response: Vec<VehicleEntry>,
}

#[derive(Debug, Deserialize)]
struct VehicleEntry {
    display_name: Option<String>,
    id_s: String,
}

/// HTTP client for the vehicle owner API
pub struct HttpTelemetrySource {
    http_client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTelemetrySource {
    /// Create a new client from configuration
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("api.base_url is required".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("carwatch/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            timeout: config.timeout(),
        })
    }

    fn vehicles_url(&self) -> String {
        format!("{}/api/1/vehicles", self.base_url)
    }

    fn vehicle_data_url(&self, vehicle: &VehicleId) -> String {
        format!(
            "{}/api/1/vehicles/{}/vehicle_data",
            self.base_url,
            urlencoding::encode(vehicle.as_str())
        )
    }
}

#[async_trait]
impl TelemetrySource for HttpTelemetrySource {
    async fn resolve_vehicles(
        &self,
        credentials: &Credentials,
    ) -> Result<HashMap<String, VehicleId>> {
        let response = self
            .http_client
            .get(self.vehicles_url())
            .bearer_auth(credentials.access_token())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| map_request_error(e, self.timeout))?;

        let response = check_status(response).await?;
        let list: VehicleList = response
            .json()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(self.timeout)
                } else {
                    Error::Network(format!("failed to parse vehicle list: {}", e))
                }
            })?;

        Ok(vehicle_map(list))
    }

    async fn fetch_snapshot(
        &self,
        credentials: &Credentials,
        vehicle: &VehicleId,
        timeout: Duration,
    ) -> Result<Snapshot> {
        let request = async {
            let response = self
                .http_client
                .get(self.vehicle_data_url(vehicle))
                .bearer_auth(credentials.access_token())
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| map_request_error(e, timeout))?;

            // 408 means the vehicle is asleep or unreachable
            if response.status() == StatusCode::REQUEST_TIMEOUT {
                return Err(Error::Timeout(timeout));
            }

            let body = check_status(response)
                .await?
                .bytes()
                .await
                .map_err(|e| map_request_error(e, timeout))?;
            Ok::<_, Error>(body)
        };

        // The per-request timeout covers the body as well; the outer bound
        // also catches a stalled DNS lookup or TLS handshake.
        let body = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| Error::Timeout(timeout))??;

        Ok(Snapshot::from_payload(body.to_vec(), chrono::Utc::now()))
    }
}

fn vehicle_map(list: VehicleList) -> HashMap<String, VehicleId> {
    list.response
        .into_iter()
        .filter_map(|v| v.display_name.map(|name| (name, VehicleId(v.id_s))))
        .collect()
}

fn map_request_error(error: reqwest::Error, timeout: Duration) -> Error {
    if error.is_timeout() {
        Error::Timeout(timeout)
    } else {
        Error::Network(format!("HTTP request failed: {}", error))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown".to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Auth(format!(
            "API rejected credentials ({}): {}",
            status, error_text
        ))),
        _ => Err(Error::Network(format!(
            "API error ({}): {}",
            status, error_text
        ))),
    }
}
