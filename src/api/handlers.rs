//! JSON request handlers

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use validator::Validate;

use crate::error::{AppError, Result};
use crate::models::{
    AcknowledgeAlert, AlertStatus, CalibrationSamples, EndInfusion, NewClinicalNote, NewDevice,
    NewInfusion, NewPatient, PatientStatus, TelemetryBatch,
};
use crate::AppState;

const DEFAULT_NOTES: i64 = 50;
const MAX_TELEMETRY: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct PatientQuery {
    pub status: Option<PatientStatus>,
}

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    pub status: Option<AlertStatus>,
    pub patient_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

// ===== Health =====

pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let database = sqlx::query("SELECT 1")
        .execute(state.db.pool())
        .await
        .is_ok();

    let body = json!({
        "status": if database { "ok" } else { "degraded" },
        "database": database,
        "version": env!("CARGO_PKG_VERSION"),
    });
    if database {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

// ===== Patients =====

#[instrument(skip(state))]
pub async fn list_patients(
    query: web::Query<PatientQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let patients = state.db.list_patients(query.status).await?;
    Ok(HttpResponse::Ok().json(patients))
}

#[instrument(skip(state, body))]
pub async fn create_patient(
    body: web::Json<NewPatient>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let patient = body.into_inner();
    patient.validate()?;
    let created = state.db.create_patient(patient).await?;
    Ok(HttpResponse::Created().json(created))
}

#[instrument(skip(state))]
pub async fn get_patient(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    let patient = state
        .db
        .get_patient(&id)
        .await?
        .ok_or_else(|| AppError::not_found("Patient", &id))?;
    Ok(HttpResponse::Ok().json(patient))
}

#[instrument(skip(state))]
pub async fn discharge_patient(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let patient = state.db.discharge_patient(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(patient))
}

#[instrument(skip(state))]
pub async fn list_notes(
    path: web::Path<String>,
    query: web::Query<LimitQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_NOTES).clamp(1, MAX_TELEMETRY);
    let notes = state.db.get_clinical_notes(&path.into_inner(), limit).await?;
    Ok(HttpResponse::Ok().json(notes))
}

#[instrument(skip(state, body))]
pub async fn add_note(
    path: web::Path<String>,
    body: web::Json<NewClinicalNote>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let note = body.into_inner();
    note.validate()?;
    let created = state.db.add_clinical_note(&path.into_inner(), note).await?;
    Ok(HttpResponse::Created().json(created))
}

#[instrument(skip(state))]
pub async fn list_patient_infusions(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let infusions = state.db.list_infusions_for_patient(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(infusions))
}

// ===== Infusions =====

#[instrument(skip(state, body))]
pub async fn start_infusion(
    body: web::Json<NewInfusion>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let infusion = body.into_inner();
    infusion.validate()?;
    let session = state.db.start_infusion(infusion).await?;
    Ok(HttpResponse::Created().json(session))
}

#[instrument(skip(state, body))]
pub async fn end_infusion(
    path: web::Path<String>,
    body: web::Json<EndInfusion>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let session = state
        .db
        .end_infusion(&path.into_inner(), body.status)
        .await?;
    Ok(HttpResponse::Ok().json(session))
}

// ===== Devices =====

#[instrument(skip(state))]
pub async fn list_devices(state: web::Data<AppState>) -> Result<HttpResponse> {
    let devices = state.db.list_devices().await?;
    Ok(HttpResponse::Ok().json(devices))
}

#[instrument(skip(state, body))]
pub async fn register_device(
    body: web::Json<NewDevice>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let device = body.into_inner();
    device.validate()?;
    let created = state.db.register_device(device).await?;
    Ok(HttpResponse::Created().json(created))
}

#[instrument(skip(state))]
pub async fn get_device(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let device_id = path.into_inner();
    let device = state.db.require_device(&device_id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "device": device,
        "latest": state.engine.latest(&device_id),
    })))
}

#[instrument(skip(state, body))]
pub async fn ingest_telemetry(
    path: web::Path<String>,
    body: web::Json<TelemetryBatch>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let snapshot = state
        .engine
        .ingest(&path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

#[instrument(skip(state))]
pub async fn device_telemetry(
    path: web::Path<String>,
    query: web::Query<LimitQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let device_id = path.into_inner();
    state.db.require_device(&device_id).await?;

    let limit = query
        .limit
        .unwrap_or(state.config.monitor.history_limit)
        .clamp(1, MAX_TELEMETRY);
    let records = state.db.recent_telemetry(&device_id, limit).await?;
    Ok(HttpResponse::Ok().json(records))
}

#[instrument(skip(state))]
pub async fn clamp_device(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let device_id = path.into_inner();
    let device_state = state.engine.clamp(&device_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "device_id": device_id, "state": device_state })))
}

#[instrument(skip(state))]
pub async fn release_device(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let device_id = path.into_inner();
    let device_state = state.engine.release(&device_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "device_id": device_id, "state": device_state })))
}

#[instrument(skip(state, body))]
pub async fn tare_device(
    path: web::Path<String>,
    body: web::Json<CalibrationSamples>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    body.validate()?;
    let calibration = state.engine.tare(&path.into_inner(), &body.samples).await?;
    Ok(HttpResponse::Ok().json(calibration))
}

#[instrument(skip(state, body))]
pub async fn span_device(
    path: web::Path<String>,
    body: web::Json<CalibrationSamples>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    body.validate()?;
    let known_weight_g = body
        .known_weight_g
        .ok_or_else(|| AppError::Validation("known_weight_g is required for a span".into()))?;

    let calibration = state
        .engine
        .span(&path.into_inner(), &body.samples, known_weight_g)
        .await?;
    Ok(HttpResponse::Ok().json(calibration))
}

// ===== Alerts =====

#[instrument(skip(state))]
pub async fn list_alerts(
    query: web::Query<AlertQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let alerts = state
        .db
        .list_alerts(query.status, query.patient_id.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(alerts))
}

#[instrument(skip(state, body))]
pub async fn acknowledge_alert(
    path: web::Path<String>,
    body: web::Json<AcknowledgeAlert>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    body.validate()?;
    let by = body.into_inner().acknowledged_by;

    let alert = state
        .db
        .update_alert_status(&path.into_inner(), AlertStatus::Acknowledged, Some(&by))
        .await?;
    info!("Alert {} acknowledged by {}", alert.id, by);
    Ok(HttpResponse::Ok().json(alert))
}

#[instrument(skip(state))]
pub async fn resolve_alert(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let alert = state
        .db
        .update_alert_status(&path.into_inner(), AlertStatus::Resolved, None)
        .await?;
    Ok(HttpResponse::Ok().json(alert))
}

#[instrument(skip(state))]
pub async fn escalate_alert(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let alert = state
        .db
        .update_alert_status(&path.into_inner(), AlertStatus::Escalated, None)
        .await?;
    Ok(HttpResponse::Ok().json(alert))
}
