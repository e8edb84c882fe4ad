//! Gatherer: the single producer of snapshots.
//!
//! Each cycle reads fresh credentials, fetches one snapshot for the
//! configured vehicle and publishes it, then sleeps for a naptime chosen
//! from what the snapshot says about the car:
//!
//! | Snapshot state | Next poll |
//! |----------------|-----------|
//! | someone in the car | 60 s |
//! | charging | 300 s |
//! | otherwise | 600 s |
//! | fetch failed or timed out | 60 s |
//!
//! Fetch failures are logged and retried forever. Failing to read
//! credentials or to find the vehicle is returned as an error and ends the
//! process.

use std::time::Duration;

use crate::channel::Broadcaster;
use crate::config::{ApiConfig, GathererConfig};
use crate::credentials::CredentialProvider;
use crate::error::{Error, Result};
use crate::source::TelemetrySource;
use crate::types::{Credentials, Snapshot, VehicleId};

/// Poll intervals and request timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub user_present: Duration,
    pub charging: Duration,
    pub idle: Duration,
    pub retry: Duration,
    pub request_timeout: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self::from_config(&GathererConfig::default(), &ApiConfig::default())
    }
}

impl Schedule {
    pub fn from_config(gatherer: &GathererConfig, api: &ApiConfig) -> Self {
        Self {
            user_present: Duration::from_secs(gatherer.user_present_secs),
            charging: Duration::from_secs(gatherer.charging_secs),
            idle: Duration::from_secs(gatherer.idle_secs),
            retry: Duration::from_secs(gatherer.retry_secs),
            request_timeout: api.timeout(),
        }
    }

    /// How long to sleep after successfully fetching `snapshot`.
    pub fn naptime(&self, snapshot: &Snapshot) -> Duration {
        if snapshot.user_present() {
            self.user_present
        } else if snapshot.charging() {
            self.charging
        } else {
            self.idle
        }
    }
}

/// Polls a [`TelemetrySource`] and publishes what it returns.
pub struct Gatherer<S, C> {
    source: S,
    credentials: C,
    vehicle_name: String,
    schedule: Schedule,
    vehicle: Option<VehicleId>,
}

impl<S, C> Gatherer<S, C>
where
    S: TelemetrySource,
    C: CredentialProvider,
{
    pub fn new(
        source: S,
        credentials: C,
        vehicle_name: impl Into<String>,
        schedule: Schedule,
    ) -> Self {
        Self {
            source,
            credentials,
            vehicle_name: vehicle_name.into(),
            schedule,
            vehicle: None,
        }
    }

    /// Poll forever. Only returns on a fatal error.
    pub async fn run(mut self, tx: Broadcaster) -> Result<()> {
        tracing::info!(vehicle = %self.vehicle_name, "Gatherer starting");

        loop {
            let naptime = self.poll_once(&tx).await?;
            tracing::debug!(naptime_secs = naptime.as_secs(), "Sleeping until next poll");
            tokio::time::sleep(naptime).await;
        }
    }

    /// Run one cycle and return how long to sleep before the next.
    pub async fn poll_once(&mut self, tx: &Broadcaster) -> Result<Duration> {
        let credentials = self.credentials.current_credentials().await?;
        let vehicle = self.vehicle_id(&credentials).await?;
        let timeout = self.schedule.request_timeout;

        let fetched = tokio::time::timeout(
            timeout,
            self.source.fetch_snapshot(&credentials, &vehicle, timeout),
        )
        .await
        .unwrap_or(Err(Error::Timeout(timeout)));

        match fetched {
            Ok(snapshot) => {
                let naptime = self.schedule.naptime(&snapshot);
                tracing::info!(
                    vehicle = %self.vehicle_name,
                    timestamp = %snapshot.timestamp(),
                    user_present = snapshot.user_present(),
                    charging = snapshot.charging(),
                    bytes = snapshot.len(),
                    naptime_secs = naptime.as_secs(),
                    "Fetched snapshot"
                );
                let receivers = tx.publish(snapshot);
                tracing::debug!(receivers, "Published snapshot");
                Ok(naptime)
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    vehicle = %self.vehicle_name,
                    error = %e,
                    retry_secs = self.schedule.retry.as_secs(),
                    "Snapshot fetch failed"
                );
                Ok(self.schedule.retry)
            }
            Err(e) => {
                // Rejected credentials are retried too.
                tracing::error!(
                    vehicle = %self.vehicle_name,
                    error = %e,
                    retry_secs = self.schedule.retry.as_secs(),
                    "Snapshot fetch rejected"
                );
                Ok(self.schedule.retry)
            }
        }
    }

    /// The vehicle id, resolved on first use and kept for the process lifetime.
    ///
    /// The vehicle list request is bounded by the same request timeout as a
    /// fetch. Unlike a fetch, running out of time here is fatal.
    async fn vehicle_id(&mut self, credentials: &Credentials) -> Result<VehicleId> {
        if let Some(id) = &self.vehicle {
            return Ok(id.clone());
        }

        let timeout = self.schedule.request_timeout;
        let vehicles = tokio::time::timeout(timeout, self.source.resolve_vehicles(credentials))
            .await
            .unwrap_or(Err(Error::Timeout(timeout)))?;
        let id = vehicles
            .get(&self.vehicle_name)
            .cloned()
            .ok_or_else(|| Error::VehicleNotFound(self.vehicle_name.clone()))?;

        tracing::info!(vehicle = %self.vehicle_name, id = %id, "Resolved vehicle");
        self.vehicle = Some(id.clone());
        Ok(id)
    }
}
