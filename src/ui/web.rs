//! Dashboard page handlers

use actix_web::http::header::ContentType;
use actix_web::{web, HttpResponse};
use serde_json::{json, Value};
use tracing::instrument;

use super::components::{
    alert_view, device_view, note_view, patient_view, reading_view, session_view, snapshot_view,
    sparkline,
};
use super::Page;
use crate::error::Result;
use crate::models::AlertStatus;
use crate::websocket::server::feed_path;
use crate::AppState;

const HOME_ALERTS: usize = 5;
const NOTES_SHOWN: i64 = 20;

fn html(body: String) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(body)
}

#[instrument(skip(state))]
async fn home(state: web::Data<AppState>) -> Result<HttpResponse> {
    let overview = state.db.overview().await?;
    let alerts: Vec<Value> = state
        .db
        .list_alerts(Some(AlertStatus::Active), None)
        .await?
        .iter()
        .take(HOME_ALERTS)
        .map(alert_view)
        .collect();

    let body = state
        .pages
        .render(Page::Home, &json!({ "overview": overview, "alerts": alerts }))?;
    Ok(html(body))
}

async fn login(state: web::Data<AppState>) -> Result<HttpResponse> {
    Ok(html(state.pages.render(Page::Login, &json!({}))?))
}

#[instrument(skip(state))]
async fn patients(state: web::Data<AppState>) -> Result<HttpResponse> {
    let patients: Vec<Value> = state
        .db
        .list_patients(None)
        .await?
        .iter()
        .map(patient_view)
        .collect();

    let body = state
        .pages
        .render(Page::Patients, &json!({ "patients": patients }))?;
    Ok(html(body))
}

/// Renders for unknown ids too; the sections are simply empty.
#[instrument(skip(state))]
async fn patient_detail(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let patient_id = path.into_inner();
    let patient = state.db.get_patient(&patient_id).await?;
    let session = state.db.active_session_for_patient(&patient_id).await?;

    let (snapshot, readings) = match &session {
        Some(session) => (
            state.engine.latest(&session.device_id),
            state
                .db
                .recent_telemetry(&session.device_id, state.config.monitor.history_limit)
                .await?,
        ),
        None => (None, Vec::new()),
    };

    // rows arrive newest first
    let weights: Vec<f64> = readings.iter().rev().map(|r| r.weight_g).collect();
    let infusions = state.db.list_infusions_for_patient(&patient_id).await?;
    let notes = state.db.get_clinical_notes(&patient_id, NOTES_SHOWN).await?;

    let data = json!({
        "patient_id": patient_id,
        "patient": patient.as_ref().map(patient_view),
        "session": session.as_ref().map(session_view),
        "snapshot": snapshot.as_ref().map(snapshot_view),
        "readings": readings.iter().map(reading_view).collect::<Vec<_>>(),
        "sparkline": sparkline(&weights),
        "infusions": infusions.iter().map(session_view).collect::<Vec<_>>(),
        "notes": notes.iter().map(note_view).collect::<Vec<_>>(),
        "ws_url": feed_path(&patient_id)?,
    });
    Ok(html(state.pages.render(Page::PatientDetail, &data)?))
}

#[instrument(skip(state))]
async fn alerts(state: web::Data<AppState>) -> Result<HttpResponse> {
    let alerts: Vec<Value> = state
        .db
        .list_alerts(None, None)
        .await?
        .iter()
        .filter(|alert| alert.status.is_open())
        .map(alert_view)
        .collect();

    let body = state
        .pages
        .render(Page::Alerts, &json!({ "alerts": alerts }))?;
    Ok(html(body))
}

#[instrument(skip(state))]
async fn devices(state: web::Data<AppState>) -> Result<HttpResponse> {
    let devices: Vec<Value> = state
        .db
        .list_devices()
        .await?
        .iter()
        .map(device_view)
        .collect();

    let body = state
        .pages
        .render(Page::Devices, &json!({ "devices": devices }))?;
    Ok(html(body))
}

/// Register the dashboard routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(home))
        .route("/login", web::get().to(login))
        .route("/patients", web::get().to(patients))
        .route("/patients/{patient_id}", web::get().to(patient_detail))
        .route("/alerts", web::get().to(alerts))
        .route("/devices", web::get().to(devices));
}
