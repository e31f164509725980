use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::text_enum;
use crate::sensing::{Calibration, DeviceState};

/// Connectivity as seen from the control center
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Offline,
    Updating,
}

text_enum!(DeviceStatus {
    Online => "online",
    Offline => "offline",
    Updating => "updating",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub mac_address: Option<String>,
    pub firmware_version: Option<String>,
    pub ward: Option<String>,
    pub bed_number: Option<i64>,
    pub status: DeviceStatus,
    pub state: DeviceState,
    pub rssi: Option<i64>,
    pub last_seen: Option<DateTime<Utc>>,
    pub calibration: Calibration,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewDevice {
    #[validate(length(min = 1, max = 64))]
    pub device_id: String,
    #[validate(length(equal = 17))]
    pub mac_address: Option<String>,
    pub firmware_version: Option<String>,
    pub ward: Option<String>,
    #[validate(range(min = 1))]
    pub bed_number: Option<i64>,
}

/// Raw ADC samples for a calibration step
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CalibrationSamples {
    #[validate(length(min = 1, max = 1000))]
    pub samples: Vec<i64>,
    /// Reference weight for a span step
    pub known_weight_g: Option<f64>,
}
