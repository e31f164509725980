use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfusionStatus {
    Active,
    Completed,
    Interrupted,
}

text_enum!(InfusionStatus {
    Active => "active",
    Completed => "completed",
    Interrupted => "interrupted",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfusionSession {
    pub id: String,
    pub patient_id: String,
    pub device_id: String,
    pub fluid_type: String,
    pub volume_ml: f64,
    pub prescribed_rate_ml_h: f64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// First filtered weight seen for the session
    pub initial_weight_g: Option<f64>,
    pub total_delivered_ml: f64,
    pub alert_count: i64,
    pub status: InfusionStatus,
}

impl InfusionSession {
    pub fn prescribed_rate_ml_min(&self) -> f32 {
        (self.prescribed_rate_ml_h / 60.0) as f32
    }

    pub fn progress_percent(&self) -> f64 {
        if self.volume_ml <= 0.0 {
            return 0.0;
        }
        (self.total_delivered_ml / self.volume_ml * 100.0).clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewInfusion {
    #[validate(length(min = 1))]
    pub patient_id: String,
    #[validate(length(min = 1))]
    pub device_id: String,
    #[validate(length(min = 1, max = 100))]
    pub fluid_type: String,
    #[validate(range(min = 1.0, max = 5000.0))]
    pub volume_ml: f64,
    #[validate(range(min = 0.1, max = 2000.0))]
    pub prescribed_rate_ml_h: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndInfusion {
    pub status: InfusionStatus,
}
