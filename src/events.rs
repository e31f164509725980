//! In-process publish/subscribe for monitoring events
//!
//! Backed by a tokio broadcast channel: publishing never blocks, works with
//! no subscribers, and a subscriber that falls behind skips the oldest
//! events instead of stalling the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{AlertKind, AlertSeverity, DeviceStatus};
use crate::sensing::DeviceState;

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    WeightUpdate {
        weight_g: f32,
    },
    FlowUpdate {
        flow_rate_ml_min: f32,
        time_to_empty_min: Option<f32>,
    },
    Alarm {
        alert_id: String,
        kind: AlertKind,
        severity: AlertSeverity,
        message: String,
    },
    StateChange {
        from: DeviceState,
        to: DeviceState,
    },
    DeviceStatus {
        status: DeviceStatus,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub device_id: String,
    pub patient_id: Option<String>,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl MonitorEvent {
    pub fn new(device_id: impl Into<String>, patient_id: Option<String>, payload: EventPayload) -> Self {
        Self {
            device_id: device_id.into(),
            patient_id,
            at: Utc::now(),
            payload,
        }
    }

    pub fn concerns_patient(&self, patient_id: &str) -> bool {
        self.patient_id.as_deref() == Some(patient_id)
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: MonitorEvent) -> usize {
        // Err only means nobody is listening right now
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
