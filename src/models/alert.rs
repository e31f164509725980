use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::text_enum;
use crate::sensing::SafetyEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

text_enum!(AlertSeverity {
    Critical => "critical",
    Warning => "warning",
    Info => "info",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowFluid,
    FreeFlow,
    FlowStall,
    AirDetect,
    SensorFail,
    DeviceOffline,
}

text_enum!(AlertKind {
    LowFluid => "low_fluid",
    FreeFlow => "free_flow",
    FlowStall => "flow_stall",
    AirDetect => "air_detect",
    SensorFail => "sensor_fail",
    DeviceOffline => "device_offline",
});

impl AlertKind {
    pub fn from_safety(event: SafetyEvent) -> Option<Self> {
        match event {
            SafetyEvent::None => None,
            SafetyEvent::LowFluid => Some(AlertKind::LowFluid),
            SafetyEvent::FreeFlow => Some(AlertKind::FreeFlow),
            SafetyEvent::FlowStall => Some(AlertKind::FlowStall),
            SafetyEvent::AirDetect => Some(AlertKind::AirDetect),
        }
    }

    pub fn severity(&self) -> AlertSeverity {
        match self {
            AlertKind::FreeFlow | AlertKind::AirDetect | AlertKind::SensorFail => {
                AlertSeverity::Critical
            }
            AlertKind::LowFluid | AlertKind::FlowStall | AlertKind::DeviceOffline => {
                AlertSeverity::Warning
            }
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            AlertKind::LowFluid => "IV bag nearly empty",
            AlertKind::FreeFlow => "Flow rate far above prescription",
            AlertKind::FlowStall => "No flow detected",
            AlertKind::AirDetect => "Air detected in line",
            AlertKind::SensorFail => "Weight sensor failure",
            AlertKind::DeviceOffline => "Device stopped reporting",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Escalated,
}

text_enum!(AlertStatus {
    Active => "active",
    Acknowledged => "acknowledged",
    Resolved => "resolved",
    Escalated => "escalated",
});

impl AlertStatus {
    /// Alerts that still need a human
    pub fn is_open(&self) -> bool {
        !matches!(self, AlertStatus::Resolved)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub device_id: String,
    pub patient_id: Option<String>,
    pub session_id: Option<String>,
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub message: String,
    pub status: AlertStatus,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AcknowledgeAlert {
    #[validate(length(min = 1, max = 100))]
    pub acknowledged_by: String,
}
