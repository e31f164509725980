use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::sensing::{DeviceState, SafetyEvent};

/// One load cell sample as sent by a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    /// Device uptime clock
    pub timestamp_ms: u64,
    /// Calibrated weight, when the device already converted it
    pub weight_g: Option<f32>,
    /// Raw ADC counts, converted with the stored calibration
    pub raw: Option<i64>,
    #[serde(default)]
    pub air_detected: bool,
}

/// Body of `POST /api/devices/{id}/telemetry`
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TelemetryBatch {
    #[validate(length(min = 1, max = 500))]
    pub readings: Vec<Reading>,
    #[validate(range(min = -127, max = 0))]
    pub rssi: Option<i64>,
    pub heap_free: Option<i64>,
    pub firmware_version: Option<String>,
    /// State the device reports for itself, e.g. while calibrating or updating
    pub state: Option<DeviceState>,
}

/// Persisted telemetry row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub device_id: String,
    pub session_id: Option<String>,
    pub weight_g: f64,
    pub flow_rate_ml_min: f64,
    pub time_to_empty_min: Option<f64>,
    pub rssi: Option<i64>,
    pub heap_free: Option<i64>,
    pub state: DeviceState,
    pub received_at: DateTime<Utc>,
}

/// Latest processed view of a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub device_id: String,
    pub patient_id: Option<String>,
    pub session_id: Option<String>,
    pub state: DeviceState,
    pub safety: SafetyEvent,
    pub weight_g: f32,
    pub flow_rate_ml_min: f32,
    pub time_to_empty_min: Option<f32>,
    pub drops_per_min: f32,
    pub rssi: Option<i64>,
    pub received_at: DateTime<Utc>,
}
