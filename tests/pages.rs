//! Dashboard page smoke tests

mod common;

use actix_web::http::StatusCode;
use actix_web::test;
use dripsense::models::{NewDevice, NewInfusion, NewPatient, Reading, TelemetryBatch};

/// Fetch a page as (status, html)
macro_rules! get_html {
    ($app:expr, $uri:expr) => {{
        let resp =
            test::call_service(&$app, test::TestRequest::get().uri($uri).to_request()).await;
        let status = resp.status();
        let body = test::read_body(resp).await;
        (status, String::from_utf8_lossy(&body).into_owned())
    }};
}

fn assert_layout(html: &str) {
    assert!(html.contains("<title>Drip-Sense Control Center</title>"));
    assert!(html.contains(r#"<html lang="en" class="dark">"#));
    assert!(html.contains(r#"content="Real-time IV drip monitoring dashboard""#));
}

#[actix_rt::test]
async fn login_page_shows_placeholder() {
    let state = common::state().await;
    let app = dripsense_app!(state);

    let (status, html) = get_html!(app, "/login");
    assert_eq!(status, StatusCode::OK);
    assert_layout(&html);
    assert!(html.contains("<h1>Sign In</h1>"));
    assert!(html.contains("Authentication coming soon..."));
}

#[actix_rt::test]
async fn patient_detail_echoes_id() {
    let state = common::state().await;
    let app = dripsense_app!(state);

    let (status, html) = get_html!(app, "/patients/123");
    assert_eq!(status, StatusCode::OK);
    assert_layout(&html);
    assert!(html.contains("Patient Detail: 123"));
    assert!(html.contains("No record on file."));
    assert!(html.contains("/ws/patients/123"));
}

#[actix_rt::test]
async fn patient_detail_escapes_markup() {
    let state = common::state().await;
    let app = dripsense_app!(state);

    let (status, html) = get_html!(app, "/patients/%3Cscript%3E");
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("Patient Detail: &lt;script&gt;"));
    assert!(!html.contains("Patient Detail: <script>"));
}

#[actix_rt::test]
async fn every_page_uses_root_layout() {
    let state = common::state().await;
    let app = dripsense_app!(state);

    for (uri, heading) in [
        ("/", "Drip-Sense Control Center"),
        ("/patients", "Patient Management"),
        ("/alerts", "Alert Center"),
        ("/devices", "Device Management"),
    ] {
        let (status, html) = get_html!(app, uri);
        assert_eq!(status, StatusCode::OK, "{}", uri);
        assert_layout(&html);
        assert!(html.contains(&format!("<h1>{}</h1>", heading)), "{}", uri);
        assert!(html.contains(r#"class="sidebar""#), "{}", uri);
    }
}

#[actix_rt::test]
async fn patient_detail_shows_live_infusion() {
    let state = common::state().await;
    state
        .db
        .create_patient(NewPatient {
            id: Some("123".into()),
            full_name: "Jane Roe".into(),
            age: Some(61),
            gender: None,
            blood_group: Some("A+".into()),
            diagnosis: Some("Sepsis".into()),
            allergies: Some("Penicillin".into()),
            ward: Some("ICU".into()),
            bed_number: Some(4),
        })
        .await
        .unwrap();
    state
        .db
        .register_device(NewDevice {
            device_id: "DS-ESP32-001".into(),
            mac_address: None,
            firmware_version: None,
            ward: Some("ICU".into()),
            bed_number: Some(4),
        })
        .await
        .unwrap();
    state
        .db
        .start_infusion(NewInfusion {
            patient_id: "123".into(),
            device_id: "DS-ESP32-001".into(),
            fluid_type: "Lactated Ringer".into(),
            volume_ml: 1000.0,
            prescribed_rate_ml_h: 125.0,
        })
        .await
        .unwrap();

    let readings = (0..4)
        .map(|i| Reading {
            timestamp_ms: i * 1000,
            weight_g: Some(900.0 - i as f32),
            raw: None,
            air_detected: false,
        })
        .collect();
    state
        .engine
        .ingest(
            "DS-ESP32-001",
            TelemetryBatch {
                readings,
                rssi: Some(-61),
                heap_free: None,
                firmware_version: None,
                state: None,
            },
        )
        .await
        .unwrap();

    let app = dripsense_app!(state);
    let (status, html) = get_html!(app, "/patients/123");
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("Jane Roe"));
    assert!(html.contains("Lactated Ringer"));
    assert!(html.contains("ICU / 4"));
    assert!(html.contains("<polyline"));
    assert!(html.contains("monitoring"));
    assert!(!html.contains("No readings yet."));
}

#[actix_rt::test]
async fn patient_detail_encodes_feed_url() {
    let state = common::state().await;
    let app = dripsense_app!(state);

    let (status, html) = get_html!(app, "/patients/bed%207%3Fa");
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains(r#"data-ws="/ws/patients/bed%207%3Fa""#));
}
