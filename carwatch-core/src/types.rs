//! Core domain types for carwatch
//!
//! | Term | Definition |
//! |------|------------|
//! | **Snapshot** | One immutable telemetry read, kept as the raw API payload |
//! | **VehicleId** | Opaque API identifier of one vehicle |
//! | **Credentials** | Bearer token used for a single poll cycle |
//!
//! A [`Snapshot`] is never parsed beyond the three fields the pipeline needs
//! for scheduling and storage: its timestamp, whether someone is in the car,
//! and whether it is charging. Those are extracted once, when the snapshot is
//! built, and the payload bytes are shared by every consumer.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::sync::Arc;

// ============================================
// Snapshot
// ============================================

/// One telemetry read.
///
/// Cloning is cheap: the payload lives behind an `Arc` and is never copied
/// or mutated once built.
#[derive(Clone, PartialEq, Eq)]
pub struct Snapshot {
    payload: Arc<[u8]>,
    timestamp: DateTime<Utc>,
    user_present: bool,
    charging: bool,
}

impl Snapshot {
    /// Build a snapshot from a raw `vehicle_data` payload.
    ///
    /// Accepts the API envelope (`{"response": {...}}`) or the bare object.
    /// Fields that are missing, and payloads that are not JSON at all, fall
    /// back to `observed_at` and `false` flags.
    pub fn from_payload(payload: impl Into<Vec<u8>>, observed_at: DateTime<Utc>) -> Self {
        let payload: Vec<u8> = payload.into();
        let fields = serde_json::from_slice::<serde_json::Value>(&payload)
            .map(|value| DerivedFields::extract(&value))
            .unwrap_or_default();

        Self {
            payload: payload.into(),
            timestamp: fields.timestamp.unwrap_or(observed_at),
            user_present: fields.user_present,
            charging: fields.charging,
        }
    }

    /// Build a snapshot with explicit derived fields
    pub fn new(
        payload: impl Into<Vec<u8>>,
        timestamp: DateTime<Utc>,
        user_present: bool,
        charging: bool,
    ) -> Self {
        let payload: Vec<u8> = payload.into();
        Self {
            payload: payload.into(),
            timestamp,
            user_present,
            charging,
        }
    }

    /// Raw payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// When the vehicle reported this state
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Someone is in the vehicle
    pub fn user_present(&self) -> bool {
        self.user_present
    }

    /// The vehicle is actively charging
    pub fn charging(&self) -> bool {
        self.charging
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("timestamp", &self.timestamp)
            .field("user_present", &self.user_present)
            .field("charging", &self.charging)
            .field("bytes", &self.payload.len())
            .finish()
    }
}

#[derive(Debug, Default)]
struct DerivedFields {
    timestamp: Option<DateTime<Utc>>,
    user_present: bool,
    charging: bool,
}

impl DerivedFields {
    fn extract(value: &serde_json::Value) -> Self {
        let data = value.get("response").unwrap_or(value);

        let timestamp = data
            .pointer("/vehicle_state/timestamp")
            .and_then(serde_json::Value::as_i64)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        let user_present = data
            .pointer("/vehicle_state/is_user_present")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        let charging = data
            .pointer("/charge_state/charging_state")
            .and_then(serde_json::Value::as_str)
            .map(|state| state == "Charging")
            .unwrap_or(false);

        Self {
            timestamp,
            user_present,
            charging,
        }
    }
}

// ============================================
// Vehicle identity
// ============================================

/// Opaque vehicle identifier (the API's `id_s`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VehicleId(pub String);

impl VehicleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================
// Credentials
// ============================================

/// Bearer credentials for the telemetry API
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_token: String,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .finish()
    }
}
