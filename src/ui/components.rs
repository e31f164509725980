//! View models and formatting shared by the dashboard pages

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::models::{
    Alert, ClinicalNote, Device, InfusionSession, Patient, TelemetryRecord, TelemetrySnapshot,
};
use crate::sensing::units::ml_per_hour;

pub const SPARKLINE_WIDTH: f64 = 300.0;
pub const SPARKLINE_HEIGHT: f64 = 60.0;

pub fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn format_optional_time(at: Option<DateTime<Utc>>) -> String {
    at.map(format_time).unwrap_or_default()
}

/// Remaining infusion time, e.g. `3h 05m` or `42 min`
pub fn format_eta(minutes: Option<f64>) -> String {
    match minutes {
        None => "n/a".into(),
        Some(m) if m < 60.0 => format!("{:.0} min", m),
        Some(m) => {
            let total = m.round() as i64;
            format!("{}h {:02}m", total / 60, total % 60)
        }
    }
}

pub fn location(ward: Option<&str>, bed: Option<i64>) -> String {
    match (ward, bed) {
        (Some(ward), Some(bed)) => format!("{} / {}", ward, bed),
        (Some(ward), None) => ward.to_string(),
        (None, Some(bed)) => format!("Bed {}", bed),
        (None, None) => String::new(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Sparkline {
    pub points: String,
    pub width: f64,
    pub height: f64,
}

/// Polyline for a series in chronological order; needs two values.
pub fn sparkline(values: &[f64]) -> Option<Sparkline> {
    if values.len() < 2 {
        return None;
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    let step = SPARKLINE_WIDTH / (values.len() - 1) as f64;

    let points = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let y = if range > 0.0 {
                SPARKLINE_HEIGHT - (v - min) / range * SPARKLINE_HEIGHT
            } else {
                SPARKLINE_HEIGHT / 2.0
            };
            format!("{:.1},{:.1}", i as f64 * step, y)
        })
        .collect::<Vec<_>>()
        .join(" ");

    Some(Sparkline {
        points,
        width: SPARKLINE_WIDTH,
        height: SPARKLINE_HEIGHT,
    })
}

pub fn patient_view(patient: &Patient) -> Value {
    json!({
        "id": patient.id,
        "full_name": patient.full_name,
        "age": patient.age,
        "gender": patient.gender,
        "blood_group": patient.blood_group,
        "diagnosis": patient.diagnosis,
        "allergies": patient.allergies,
        "location": location(patient.ward.as_deref(), patient.bed_number),
        "status": patient.status.as_str(),
        "admitted": format_time(patient.admitted_at),
    })
}

pub fn session_view(session: &InfusionSession) -> Value {
    json!({
        "id": session.id,
        "device_id": session.device_id,
        "fluid_type": session.fluid_type,
        "volume": format!("{:.0} mL", session.volume_ml),
        "rate": format!("{:.1} mL/h", session.prescribed_rate_ml_h),
        "started": format_time(session.started_at),
        "ended": format_optional_time(session.ended_at),
        "delivered": format!("{:.1} mL", session.total_delivered_ml),
        "progress": format!("{:.0}%", session.progress_percent()),
        "alert_count": session.alert_count,
        "status": session.status.as_str(),
    })
}

pub fn snapshot_view(snapshot: &TelemetrySnapshot) -> Value {
    json!({
        "weight": format!("{:.1} g", snapshot.weight_g),
        "flow": format!(
            "{:.2} mL/min ({:.0} mL/h)",
            snapshot.flow_rate_ml_min,
            ml_per_hour(snapshot.flow_rate_ml_min)
        ),
        "drops": format!("{:.0} gtt/min", snapshot.drops_per_min),
        "eta": format_eta(snapshot.time_to_empty_min.map(f64::from)),
        "state": snapshot.state.name(),
        "updated": format_time(snapshot.received_at),
    })
}

pub fn reading_view(record: &TelemetryRecord) -> Value {
    json!({
        "time": record.received_at.format("%H:%M:%S").to_string(),
        "weight": format!("{:.1} g", record.weight_g),
        "flow": format!("{:.2} mL/min", record.flow_rate_ml_min),
        "eta": format_eta(record.time_to_empty_min),
        "state": record.state.name(),
    })
}

pub fn note_view(note: &ClinicalNote) -> Value {
    json!({
        "author": note.author,
        "content": note.content,
        "created": format_time(note.created_at),
    })
}

pub fn alert_view(alert: &Alert) -> Value {
    json!({
        "id": alert.id,
        "kind": alert.kind.as_str(),
        "severity": alert.severity.as_str(),
        "message": alert.message,
        "status": alert.status.as_str(),
        "device_id": alert.device_id,
        "patient_id": alert.patient_id,
        "acknowledged_by": alert.acknowledged_by,
        "triggered": format_time(alert.triggered_at),
    })
}

pub fn device_view(device: &Device) -> Value {
    json!({
        "device_id": device.device_id,
        "mac_address": device.mac_address,
        "firmware_version": device.firmware_version,
        "location": location(device.ward.as_deref(), device.bed_number),
        "status": device.status.as_str(),
        "state": device.state.name(),
        "rssi": device.rssi.map(|r| format!("{} dBm", r)),
        "last_seen": format_optional_time(device.last_seen),
    })
}
