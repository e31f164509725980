//! REST API integration tests

mod common;

use actix_web::http::{header, StatusCode};
use actix_web::test;
use fake::faker::name::en::Name;
use fake::Fake;
use serde_json::{json, Value};

/// Send a request and return (status, json body)
macro_rules! call_json {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status();
        let body = test::read_body(resp).await;
        let value: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }};
}

fn post(uri: &str, body: Value) -> test::TestRequest {
    test::TestRequest::post().uri(uri).set_json(body)
}

fn get(uri: &str) -> test::TestRequest {
    test::TestRequest::get().uri(uri)
}

fn readings(weights: &[f64], start_ms: u64) -> Value {
    let readings: Vec<Value> = weights
        .iter()
        .enumerate()
        .map(|(i, w)| json!({ "timestamp_ms": start_ms + i as u64 * 1000, "weight_g": w }))
        .collect();
    json!({ "readings": readings, "rssi": -58, "heap_free": 150000 })
}

#[actix_rt::test]
async fn health_reports_database() {
    let state = common::state().await;
    let app = dripsense_app!(state);

    let resp = test::call_service(&app, get("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::X_CONTENT_TYPE_OPTIONS).unwrap(),
        "nosniff"
    );
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
}

#[actix_rt::test]
async fn patient_crud() {
    let state = common::state().await;
    let app = dripsense_app!(state);
    let name: String = Name().fake();
    let age: i64 = (18..95).fake();

    let (status, created) = call_json!(
        app,
        post(
            "/api/patients",
            json!({ "full_name": name, "age": age, "ward": "B", "bed_number": 2 })
        )
    );
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "active");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, fetched) = call_json!(app, get(&format!("/api/patients/{}", id)));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["full_name"], name.as_str());
    assert_eq!(fetched["age"], age);

    let (status, list) = call_json!(app, get("/api/patients?status=active"));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, note) = call_json!(
        app,
        post(
            &format!("/api/patients/{}/notes", id),
            json!({ "author": "Dr. Adams", "content": "Start maintenance fluids." })
        )
    );
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(note["patient_id"], id.as_str());

    let (status, discharged) =
        call_json!(app, post(&format!("/api/patients/{}/discharge", id), json!({})));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(discharged["status"], "discharged");
}

#[actix_rt::test]
async fn invalid_payloads_are_rejected() {
    let state = common::state().await;
    let app = dripsense_app!(state);

    let (status, body) = call_json!(
        app,
        post("/api/patients", json!({ "full_name": "", "age": 200 }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Validation"));

    let (status, body) = call_json!(
        app,
        test::TestRequest::post()
            .uri("/api/devices")
            .insert_header(header::ContentType::json())
            .set_payload("{not json")
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = call_json!(app, get("/api/patients/nobody"));
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Patient not found: nobody");
}

#[actix_rt::test]
async fn telemetry_drives_alert_lifecycle() {
    let state = common::state().await;
    let app = dripsense_app!(state);

    let (status, _) = call_json!(
        app,
        post("/api/devices", json!({ "device_id": "DS-ESP32-001", "ward": "A", "bed_number": 1 }))
    );
    assert_eq!(status, StatusCode::CREATED);
    call_json!(app, post("/api/patients", json!({ "id": "123", "full_name": "Jane Roe" })));

    let (status, session) = call_json!(
        app,
        post(
            "/api/infusions",
            json!({
                "patient_id": "123",
                "device_id": "DS-ESP32-001",
                "fluid_type": "0.9% NaCl",
                "volume_ml": 500.0,
                "prescribed_rate_ml_h": 100.0
            })
        )
    );
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call_json!(
        app,
        post(
            "/api/infusions",
            json!({
                "patient_id": "123",
                "device_id": "DS-ESP32-001",
                "fluid_type": "0.9% NaCl",
                "volume_ml": 500.0,
                "prescribed_rate_ml_h": 100.0
            })
        )
    );
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, snapshot) = call_json!(
        app,
        post("/api/devices/DS-ESP32-001/telemetry", readings(&[6.0; 4], 0))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["state"], "low_fluid");
    assert_eq!(snapshot["safety"], "low_fluid");
    assert_eq!(snapshot["patient_id"], "123");

    let (_, history) = call_json!(app, get("/api/devices/DS-ESP32-001/telemetry?limit=2"));
    assert_eq!(history.as_array().unwrap().len(), 2);

    let (_, alerts) = call_json!(app, get("/api/alerts?status=active&patient_id=123"));
    let alerts = alerts.as_array().unwrap().clone();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["kind"], "low_fluid");
    let alert_id = alerts[0]["id"].as_str().unwrap().to_string();

    let (status, _) = call_json!(
        app,
        post(
            &format!("/api/alerts/{}/acknowledge", alert_id),
            json!({ "acknowledged_by": "" })
        )
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, acked) = call_json!(
        app,
        post(
            &format!("/api/alerts/{}/acknowledge", alert_id),
            json!({ "acknowledged_by": "nurse.kim" })
        )
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(acked["status"], "acknowledged");
    assert_eq!(acked["acknowledged_by"], "nurse.kim");

    let (status, _) = call_json!(app, post(&format!("/api/alerts/{}/resolve", alert_id), json!({})));
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call_json!(app, post(&format!("/api/alerts/{}/escalate", alert_id), json!({})));
    assert_eq!(status, StatusCode::CONFLICT);

    let session_id = session["id"].as_str().unwrap();
    let (status, ended) = call_json!(
        app,
        post(&format!("/api/infusions/{}/end", session_id), json!({ "status": "completed" }))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["status"], "completed");
    assert_eq!(ended["alert_count"], 1);

    let (_, infusions) = call_json!(app, get("/api/patients/123/infusions"));
    assert_eq!(infusions.as_array().unwrap().len(), 1);
}

#[actix_rt::test]
async fn clamp_release_and_calibration() {
    let state = common::state().await;
    let app = dripsense_app!(state);
    call_json!(app, post("/api/devices", json!({ "device_id": "DS-ESP32-002" })));
    call_json!(app, post("/api/patients", json!({ "id": "77", "full_name": "John Doe" })));
    call_json!(
        app,
        post(
            "/api/infusions",
            json!({
                "patient_id": "77",
                "device_id": "DS-ESP32-002",
                "fluid_type": "D5W",
                "volume_ml": 250.0,
                "prescribed_rate_ml_h": 50.0
            })
        )
    );
    call_json!(
        app,
        post("/api/devices/DS-ESP32-002/telemetry", readings(&[240.0], 0))
    );

    let (status, body) = call_json!(app, post("/api/devices/DS-ESP32-002/clamp", json!({})));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "clamped");

    let (status, body) = call_json!(app, post("/api/devices/DS-ESP32-002/release", json!({})));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "monitoring");

    let (status, _) = call_json!(app, post("/api/devices/DS-ESP32-002/release", json!({})));
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call_json!(
        app,
        post("/api/devices/DS-ESP32-002/calibration/tare", json!({ "samples": [8000, 8001] }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call_json!(
        app,
        post("/api/devices/DS-ESP32-002/calibration/tare", json!({ "samples": vec![8000; 20] }))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["zero_offset"], 8000.0);

    let (status, _) = call_json!(
        app,
        post("/api/devices/DS-ESP32-002/calibration/span", json!({ "samples": [9000] }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call_json!(
        app,
        post(
            "/api/devices/DS-ESP32-002/calibration/span",
            json!({ "samples": [9000, 9000], "known_weight_g": 500.0 })
        )
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scale_factor"], 2.0);

    let (_, device) = call_json!(app, get("/api/devices/DS-ESP32-002"));
    assert_eq!(device["device"]["calibration"]["scale_factor"], 2.0);
    assert_eq!(device["latest"]["device_id"], "DS-ESP32-002");
}

#[actix_rt::test]
async fn unknown_device_telemetry_is_not_found() {
    let state = common::state().await;
    let app = dripsense_app!(state);

    let (status, _) = call_json!(app, post("/api/devices/ghost/telemetry", readings(&[100.0], 0)));
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call_json!(
        app,
        post("/api/devices/ghost/telemetry", json!({ "readings": [] }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_rt::test]
async fn websocket_upgrade() {
    let state = common::state().await;
    let app = dripsense_app!(state);

    let req = test::TestRequest::get()
        .uri("/ws/patients/123")
        .insert_header((header::UPGRADE, "websocket"))
        .insert_header((header::CONNECTION, "upgrade"))
        .insert_header((header::SEC_WEBSOCKET_VERSION, "13"))
        .insert_header((header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ=="))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);

    let plain = test::call_service(&app, get("/ws/patients/123").to_request()).await;
    assert_eq!(plain.status(), StatusCode::BAD_REQUEST);
}
