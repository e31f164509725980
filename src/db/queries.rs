//! Store operations for patients, devices, infusions, telemetry and alerts

use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{from_millis, to_millis, Database};
use crate::error::{AppError, Result};
use crate::models::{
    Alert, AlertKind, AlertStatus, ClinicalNote, Device, DeviceStatus, InfusionSession,
    InfusionStatus, NewClinicalNote, NewDevice, NewInfusion, NewPatient, Patient, PatientStatus,
    TelemetryRecord,
};
use crate::sensing::{Calibration, DeviceState};

/// Counts for the ward overview
#[derive(Debug, Clone, Default, Serialize)]
pub struct Overview {
    pub active_patients: i64,
    pub online_devices: i64,
    pub total_devices: i64,
    pub open_alerts: i64,
    pub active_infusions: i64,
}

/// Stored timestamps keep millisecond precision
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn parse_column<T: FromStr<Err = String>>(row: &SqliteRow, column: &str) -> std::result::Result<T, sqlx::Error> {
    let text: String = row.try_get(column)?;
    text.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))
}

fn optional_millis(row: &SqliteRow, column: &str) -> std::result::Result<Option<DateTime<Utc>>, sqlx::Error> {
    row.try_get::<Option<i64>, _>(column)?
        .map(from_millis)
        .transpose()
}

fn patient_from_row(row: &SqliteRow) -> std::result::Result<Patient, sqlx::Error> {
    Ok(Patient {
        id: row.try_get("id")?,
        full_name: row.try_get("full_name")?,
        age: row.try_get("age")?,
        gender: row.try_get("gender")?,
        blood_group: row.try_get("blood_group")?,
        diagnosis: row.try_get("diagnosis")?,
        allergies: row.try_get("allergies")?,
        ward: row.try_get("ward")?,
        bed_number: row.try_get("bed_number")?,
        status: parse_column(row, "status")?,
        admitted_at: from_millis(row.try_get("admitted_at")?)?,
    })
}

fn note_from_row(row: &SqliteRow) -> std::result::Result<ClinicalNote, sqlx::Error> {
    Ok(ClinicalNote {
        id: row.try_get("id")?,
        patient_id: row.try_get("patient_id")?,
        author: row.try_get("author")?,
        content: row.try_get("content")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn device_from_row(row: &SqliteRow) -> std::result::Result<Device, sqlx::Error> {
    Ok(Device {
        device_id: row.try_get("device_id")?,
        mac_address: row.try_get("mac_address")?,
        firmware_version: row.try_get("firmware_version")?,
        ward: row.try_get("ward")?,
        bed_number: row.try_get("bed_number")?,
        status: parse_column(row, "status")?,
        state: parse_column(row, "state")?,
        rssi: row.try_get("rssi")?,
        last_seen: optional_millis(row, "last_seen")?,
        calibration: Calibration {
            zero_offset: row.try_get("zero_offset")?,
            scale_factor: row.try_get("scale_factor")?,
        },
        registered_at: from_millis(row.try_get("registered_at")?)?,
    })
}

fn session_from_row(row: &SqliteRow) -> std::result::Result<InfusionSession, sqlx::Error> {
    Ok(InfusionSession {
        id: row.try_get("id")?,
        patient_id: row.try_get("patient_id")?,
        device_id: row.try_get("device_id")?,
        fluid_type: row.try_get("fluid_type")?,
        volume_ml: row.try_get("volume_ml")?,
        prescribed_rate_ml_h: row.try_get("prescribed_rate_ml_h")?,
        started_at: from_millis(row.try_get("started_at")?)?,
        ended_at: optional_millis(row, "ended_at")?,
        initial_weight_g: row.try_get("initial_weight_g")?,
        total_delivered_ml: row.try_get("total_delivered_ml")?,
        alert_count: row.try_get("alert_count")?,
        status: parse_column(row, "status")?,
    })
}

fn telemetry_from_row(row: &SqliteRow) -> std::result::Result<TelemetryRecord, sqlx::Error> {
    Ok(TelemetryRecord {
        device_id: row.try_get("device_id")?,
        session_id: row.try_get("session_id")?,
        weight_g: row.try_get("weight_g")?,
        flow_rate_ml_min: row.try_get("flow_rate_ml_min")?,
        time_to_empty_min: row.try_get("time_to_empty_min")?,
        rssi: row.try_get("rssi")?,
        heap_free: row.try_get("heap_free")?,
        state: parse_column(row, "state")?,
        received_at: from_millis(row.try_get("received_at")?)?,
    })
}

fn alert_from_row(row: &SqliteRow) -> std::result::Result<Alert, sqlx::Error> {
    Ok(Alert {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        patient_id: row.try_get("patient_id")?,
        session_id: row.try_get("session_id")?,
        severity: parse_column(row, "severity")?,
        kind: parse_column(row, "kind")?,
        message: row.try_get("message")?,
        status: parse_column(row, "status")?,
        triggered_at: from_millis(row.try_get("triggered_at")?)?,
        acknowledged_at: optional_millis(row, "acknowledged_at")?,
        acknowledged_by: row.try_get("acknowledged_by")?,
        resolved_at: optional_millis(row, "resolved_at")?,
    })
}

impl Database {
    // ===== Patients =====

    #[instrument(skip(self, patient), fields(name = %patient.full_name))]
    pub async fn create_patient(&self, patient: NewPatient) -> Result<Patient> {
        let id = patient.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.get_patient(&id).await?.is_some() {
            return Err(AppError::Conflict(format!("patient {} already exists", id)));
        }

        let record = Patient {
            id,
            full_name: patient.full_name,
            age: patient.age,
            gender: patient.gender,
            blood_group: patient.blood_group,
            diagnosis: patient.diagnosis,
            allergies: patient.allergies,
            ward: patient.ward,
            bed_number: patient.bed_number,
            status: PatientStatus::Active,
            admitted_at: now(),
        };

        sqlx::query(
            "INSERT INTO patients (
                id, full_name, age, gender, blood_group, diagnosis,
                allergies, ward, bed_number, status, admitted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.full_name)
        .bind(record.age)
        .bind(&record.gender)
        .bind(&record.blood_group)
        .bind(&record.diagnosis)
        .bind(&record.allergies)
        .bind(&record.ward)
        .bind(record.bed_number)
        .bind(record.status.as_str())
        .bind(to_millis(record.admitted_at))
        .execute(&self.pool)
        .await?;

        info!("Patient admitted: {}", record.id);
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn get_patient(&self, id: &str) -> Result<Option<Patient>> {
        let row = sqlx::query("SELECT * FROM patients WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(patient_from_row).transpose()?)
    }

    #[instrument(skip(self))]
    pub async fn list_patients(&self, status: Option<PatientStatus>) -> Result<Vec<Patient>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM patients WHERE status = ? ORDER BY ward, bed_number, full_name")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM patients ORDER BY ward, bed_number, full_name")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.iter().map(patient_from_row).collect::<std::result::Result<_, _>>()?)
    }

    #[instrument(skip(self))]
    pub async fn discharge_patient(&self, id: &str) -> Result<Patient> {
        if self.active_session_for_patient(id).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "patient {} still has a running infusion",
                id
            )));
        }

        let updated = sqlx::query("UPDATE patients SET status = ? WHERE id = ?")
            .bind(PatientStatus::Discharged.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::not_found("Patient", id));
        }

        info!("Patient discharged: {}", id);
        self.get_patient(id)
            .await?
            .ok_or_else(|| AppError::not_found("Patient", id))
    }

    // ===== Clinical Notes =====

    #[instrument(skip(self, note), fields(author = %note.author))]
    pub async fn add_clinical_note(&self, patient_id: &str, note: NewClinicalNote) -> Result<ClinicalNote> {
        if self.get_patient(patient_id).await?.is_none() {
            return Err(AppError::not_found("Patient", patient_id));
        }

        let record = ClinicalNote {
            id: Uuid::new_v4().to_string(),
            patient_id: patient_id.to_string(),
            author: note.author,
            content: note.content,
            created_at: now(),
        };

        sqlx::query(
            "INSERT INTO clinical_notes (id, patient_id, author, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.patient_id)
        .bind(&record.author)
        .bind(&record.content)
        .bind(to_millis(record.created_at))
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn get_clinical_notes(&self, patient_id: &str, limit: i64) -> Result<Vec<ClinicalNote>> {
        let rows = sqlx::query(
            "SELECT * FROM clinical_notes
             WHERE patient_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(patient_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(note_from_row).collect::<std::result::Result<_, _>>()?)
    }

    // ===== Devices =====

    #[instrument(skip(self, device), fields(device_id = %device.device_id))]
    pub async fn register_device(&self, device: NewDevice) -> Result<Device> {
        if self.get_device(&device.device_id).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "device {} already registered",
                device.device_id
            )));
        }

        let record = Device {
            device_id: device.device_id,
            mac_address: device.mac_address,
            firmware_version: device.firmware_version,
            ward: device.ward,
            bed_number: device.bed_number,
            status: DeviceStatus::Offline,
            state: DeviceState::Idle,
            rssi: None,
            last_seen: None,
            calibration: Calibration::default(),
            registered_at: now(),
        };

        sqlx::query(
            "INSERT INTO devices (
                device_id, mac_address, firmware_version, ward, bed_number,
                status, state, zero_offset, scale_factor, registered_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.device_id)
        .bind(&record.mac_address)
        .bind(&record.firmware_version)
        .bind(&record.ward)
        .bind(record.bed_number)
        .bind(record.status.as_str())
        .bind(record.state.name())
        .bind(record.calibration.zero_offset)
        .bind(record.calibration.scale_factor)
        .bind(to_millis(record.registered_at))
        .execute(&self.pool)
        .await?;

        info!("Device registered: {}", record.device_id);
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn get_device(&self, device_id: &str) -> Result<Option<Device>> {
        let row = sqlx::query("SELECT * FROM devices WHERE device_id = ?")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(device_from_row).transpose()?)
    }

    pub async fn require_device(&self, device_id: &str) -> Result<Device> {
        self.get_device(device_id)
            .await?
            .ok_or_else(|| AppError::not_found("Device", device_id))
    }

    #[instrument(skip(self))]
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let rows = sqlx::query("SELECT * FROM devices ORDER BY ward, bed_number, device_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(device_from_row).collect::<std::result::Result<_, _>>()?)
    }

    /// Record a check-in; returns the status the device had before.
    #[instrument(skip(self))]
    pub async fn mark_device_seen(
        &self,
        device_id: &str,
        rssi: Option<i64>,
        firmware_version: Option<&str>,
        seen_at: DateTime<Utc>,
    ) -> Result<DeviceStatus> {
        let previous = self.require_device(device_id).await?.status;

        sqlx::query(
            "UPDATE devices
             SET status = ?, last_seen = ?, rssi = COALESCE(?, rssi),
                 firmware_version = COALESCE(?, firmware_version)
             WHERE device_id = ?",
        )
        .bind(DeviceStatus::Online.as_str())
        .bind(to_millis(seen_at))
        .bind(rssi)
        .bind(firmware_version)
        .bind(device_id)
        .execute(&self.pool)
        .await?;

        Ok(previous)
    }

    #[instrument(skip(self))]
    pub async fn set_device_status(&self, device_id: &str, status: DeviceStatus) -> Result<()> {
        sqlx::query("UPDATE devices SET status = ? WHERE device_id = ?")
            .bind(status.as_str())
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_device_state(&self, device_id: &str, state: DeviceState) -> Result<()> {
        sqlx::query("UPDATE devices SET state = ? WHERE device_id = ?")
            .bind(state.name())
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_calibration(&self, device_id: &str, calibration: Calibration) -> Result<()> {
        sqlx::query("UPDATE devices SET zero_offset = ?, scale_factor = ? WHERE device_id = ?")
            .bind(calibration.zero_offset)
            .bind(calibration.scale_factor)
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Online devices that have not checked in since `cutoff`
    #[instrument(skip(self))]
    pub async fn stale_devices(&self, cutoff: DateTime<Utc>) -> Result<Vec<Device>> {
        let rows = sqlx::query(
            "SELECT * FROM devices
             WHERE status = ? AND last_seen IS NOT NULL AND last_seen < ?",
        )
        .bind(DeviceStatus::Online.as_str())
        .bind(to_millis(cutoff))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(device_from_row).collect::<std::result::Result<_, _>>()?)
    }

    // ===== Infusion Sessions =====

    #[instrument(skip(self, infusion), fields(patient_id = %infusion.patient_id, device_id = %infusion.device_id))]
    pub async fn start_infusion(&self, infusion: NewInfusion) -> Result<InfusionSession> {
        let patient = self
            .get_patient(&infusion.patient_id)
            .await?
            .ok_or_else(|| AppError::not_found("Patient", &infusion.patient_id))?;
        if patient.status == PatientStatus::Discharged {
            return Err(AppError::Conflict(format!("patient {} is discharged", patient.id)));
        }
        self.require_device(&infusion.device_id).await?;

        if self.active_session_for_device(&infusion.device_id).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "device {} already runs an infusion",
                infusion.device_id
            )));
        }
        if self.active_session_for_patient(&infusion.patient_id).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "patient {} already has a running infusion",
                infusion.patient_id
            )));
        }

        let session = InfusionSession {
            id: Uuid::new_v4().to_string(),
            patient_id: infusion.patient_id,
            device_id: infusion.device_id,
            fluid_type: infusion.fluid_type,
            volume_ml: infusion.volume_ml,
            prescribed_rate_ml_h: infusion.prescribed_rate_ml_h,
            started_at: now(),
            ended_at: None,
            initial_weight_g: None,
            total_delivered_ml: 0.0,
            alert_count: 0,
            status: InfusionStatus::Active,
        };

        sqlx::query(
            "INSERT INTO infusion_sessions (
                id, patient_id, device_id, fluid_type, volume_ml,
                prescribed_rate_ml_h, started_at, total_delivered_ml,
                alert_count, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.patient_id)
        .bind(&session.device_id)
        .bind(&session.fluid_type)
        .bind(session.volume_ml)
        .bind(session.prescribed_rate_ml_h)
        .bind(to_millis(session.started_at))
        .bind(session.total_delivered_ml)
        .bind(session.alert_count)
        .bind(session.status.as_str())
        .execute(&self.pool)
        .await?;

        info!("Infusion started: {} on {}", session.id, session.device_id);
        Ok(session)
    }

    #[instrument(skip(self))]
    pub async fn get_infusion(&self, id: &str) -> Result<Option<InfusionSession>> {
        let row = sqlx::query("SELECT * FROM infusion_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(session_from_row).transpose()?)
    }

    #[instrument(skip(self))]
    pub async fn end_infusion(&self, id: &str, status: InfusionStatus) -> Result<InfusionSession> {
        if status == InfusionStatus::Active {
            return Err(AppError::Validation(
                "an infusion can only end as completed or interrupted".into(),
            ));
        }

        let session = self
            .get_infusion(id)
            .await?
            .ok_or_else(|| AppError::not_found("Infusion", id))?;
        if session.status != InfusionStatus::Active {
            return Err(AppError::Conflict(format!("infusion {} already ended", id)));
        }

        sqlx::query("UPDATE infusion_sessions SET status = ?, ended_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(to_millis(now()))
            .bind(id)
            .execute(&self.pool)
            .await?;

        info!("Infusion {} ended as {}", id, status);
        self.get_infusion(id)
            .await?
            .ok_or_else(|| AppError::not_found("Infusion", id))
    }

    #[instrument(skip(self))]
    pub async fn active_session_for_device(&self, device_id: &str) -> Result<Option<InfusionSession>> {
        let row = sqlx::query("SELECT * FROM infusion_sessions WHERE device_id = ? AND status = 'active'")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(session_from_row).transpose()?)
    }

    #[instrument(skip(self))]
    pub async fn active_session_for_patient(&self, patient_id: &str) -> Result<Option<InfusionSession>> {
        let row = sqlx::query("SELECT * FROM infusion_sessions WHERE patient_id = ? AND status = 'active'")
            .bind(patient_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(session_from_row).transpose()?)
    }

    #[instrument(skip(self))]
    pub async fn list_infusions_for_patient(&self, patient_id: &str) -> Result<Vec<InfusionSession>> {
        let rows = sqlx::query(
            "SELECT * FROM infusion_sessions
             WHERE patient_id = ?
             ORDER BY started_at DESC, rowid DESC",
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(session_from_row).collect::<std::result::Result<_, _>>()?)
    }

    pub async fn update_session_progress(
        &self,
        session_id: &str,
        initial_weight_g: f64,
        total_delivered_ml: f64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE infusion_sessions
             SET initial_weight_g = COALESCE(initial_weight_g, ?), total_delivered_ml = ?
             WHERE id = ?",
        )
        .bind(initial_weight_g)
        .bind(total_delivered_ml)
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ===== Telemetry =====

    pub async fn record_telemetry(&self, record: &TelemetryRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO telemetry (
                device_id, session_id, weight_g, flow_rate_ml_min,
                time_to_empty_min, rssi, heap_free, state, received_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.device_id)
        .bind(&record.session_id)
        .bind(record.weight_g)
        .bind(record.flow_rate_ml_min)
        .bind(record.time_to_empty_min)
        .bind(record.rssi)
        .bind(record.heap_free)
        .bind(record.state.name())
        .bind(to_millis(record.received_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent rows first
    #[instrument(skip(self))]
    pub async fn recent_telemetry(&self, device_id: &str, limit: i64) -> Result<Vec<TelemetryRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM telemetry
             WHERE device_id = ?
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(telemetry_from_row).collect::<std::result::Result<_, _>>()?)
    }

    // ===== Alerts =====

    #[instrument(skip(self, alert), fields(device_id = %alert.device_id, kind = %alert.kind))]
    pub async fn create_alert(&self, alert: &Alert) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO alerts (
                id, device_id, patient_id, session_id, severity, kind,
                message, status, triggered_at, acknowledged_at,
                acknowledged_by, resolved_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&alert.id)
        .bind(&alert.device_id)
        .bind(&alert.patient_id)
        .bind(&alert.session_id)
        .bind(alert.severity.as_str())
        .bind(alert.kind.as_str())
        .bind(&alert.message)
        .bind(alert.status.as_str())
        .bind(to_millis(alert.triggered_at))
        .bind(alert.acknowledged_at.map(to_millis))
        .bind(&alert.acknowledged_by)
        .bind(alert.resolved_at.map(to_millis))
        .execute(&mut *tx)
        .await?;

        if let Some(session_id) = &alert.session_id {
            sqlx::query("UPDATE infusion_sessions SET alert_count = alert_count + 1 WHERE id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!("Alert raised: {} ({})", alert.kind, alert.severity);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(alert_from_row).transpose()?)
    }

    /// Newest first, optionally filtered
    #[instrument(skip(self))]
    pub async fn list_alerts(
        &self,
        status: Option<AlertStatus>,
        patient_id: Option<&str>,
    ) -> Result<Vec<Alert>> {
        let rows = sqlx::query(
            "SELECT * FROM alerts
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR patient_id = ?2)
             ORDER BY triggered_at DESC, rowid DESC",
        )
        .bind(status.map(|s| s.as_str()))
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(alert_from_row).collect::<std::result::Result<_, _>>()?)
    }

    /// The unresolved alert of a kind for a device, if any
    #[instrument(skip(self))]
    pub async fn open_alert(
        &self,
        device_id: &str,
        session_id: Option<&str>,
        kind: AlertKind,
    ) -> Result<Option<Alert>> {
        let row = sqlx::query(
            "SELECT * FROM alerts
             WHERE device_id = ? AND session_id IS ? AND kind = ? AND status != 'resolved'
             ORDER BY triggered_at DESC
             LIMIT 1",
        )
        .bind(device_id)
        .bind(session_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(alert_from_row).transpose()?)
    }

    #[instrument(skip(self))]
    pub async fn update_alert_status(
        &self,
        id: &str,
        status: AlertStatus,
        actor: Option<&str>,
    ) -> Result<Alert> {
        let alert = self
            .get_alert(id)
            .await?
            .ok_or_else(|| AppError::not_found("Alert", id))?;

        let allowed = match (alert.status, status) {
            (AlertStatus::Resolved, _) => false,
            (from, to) if from == to => false,
            (_, AlertStatus::Active) => false,
            _ => true,
        };
        if !allowed {
            return Err(AppError::Conflict(format!(
                "alert {} cannot go from {} to {}",
                id, alert.status, status
            )));
        }

        let at = to_millis(now());
        match status {
            AlertStatus::Acknowledged => {
                sqlx::query(
                    "UPDATE alerts SET status = ?, acknowledged_at = ?, acknowledged_by = ? WHERE id = ?",
                )
                .bind(status.as_str())
                .bind(at)
                .bind(actor)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            AlertStatus::Resolved => {
                sqlx::query("UPDATE alerts SET status = ?, resolved_at = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(at)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
            _ => {
                sqlx::query("UPDATE alerts SET status = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
        }

        debug!("Alert {} -> {}", id, status);
        self.get_alert(id)
            .await?
            .ok_or_else(|| AppError::not_found("Alert", id))
    }

    /// Close every unresolved alert of a kind for a device
    #[instrument(skip(self))]
    pub async fn resolve_open_alerts(&self, device_id: &str, kind: AlertKind) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE alerts SET status = 'resolved', resolved_at = ?
             WHERE device_id = ? AND kind = ? AND status != 'resolved'",
        )
        .bind(to_millis(now()))
        .bind(device_id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ===== Overview =====

    #[instrument(skip(self))]
    pub async fn overview(&self) -> Result<Overview> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM patients WHERE status = 'active') AS active_patients,
                (SELECT COUNT(*) FROM devices WHERE status = 'online') AS online_devices,
                (SELECT COUNT(*) FROM devices) AS total_devices,
                (SELECT COUNT(*) FROM alerts WHERE status != 'resolved') AS open_alerts,
                (SELECT COUNT(*) FROM infusion_sessions WHERE status = 'active') AS active_infusions",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(Overview {
            active_patients: row.try_get("active_patients")?,
            online_devices: row.try_get("online_devices")?,
            total_devices: row.try_get("total_devices")?,
            open_alerts: row.try_get("open_alerts")?,
            active_infusions: row.try_get("active_infusions")?,
        })
    }
}
