//! REST routes

use actix_web::web;

use super::handlers;
use crate::error::AppError;

/// Register `/health` and the `/api` scope
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health))
        .service(
            web::scope("/api")
                // malformed bodies and queries answer with the usual JSON error
                .app_data(
                    web::JsonConfig::default()
                        .error_handler(|err, _req| AppError::Validation(err.to_string()).into()),
                )
                .app_data(
                    web::QueryConfig::default()
                        .error_handler(|err, _req| AppError::Validation(err.to_string()).into()),
                )
                .service(
                    web::resource("/patients")
                        .route(web::get().to(handlers::list_patients))
                        .route(web::post().to(handlers::create_patient)),
                )
                .route("/patients/{id}", web::get().to(handlers::get_patient))
                .route(
                    "/patients/{id}/discharge",
                    web::post().to(handlers::discharge_patient),
                )
                .service(
                    web::resource("/patients/{id}/notes")
                        .route(web::get().to(handlers::list_notes))
                        .route(web::post().to(handlers::add_note)),
                )
                .route(
                    "/patients/{id}/infusions",
                    web::get().to(handlers::list_patient_infusions),
                )
                .route("/infusions", web::post().to(handlers::start_infusion))
                .route("/infusions/{id}/end", web::post().to(handlers::end_infusion))
                .service(
                    web::resource("/devices")
                        .route(web::get().to(handlers::list_devices))
                        .route(web::post().to(handlers::register_device)),
                )
                .route("/devices/{id}", web::get().to(handlers::get_device))
                .service(
                    web::resource("/devices/{id}/telemetry")
                        .route(web::get().to(handlers::device_telemetry))
                        .route(web::post().to(handlers::ingest_telemetry)),
                )
                .route("/devices/{id}/clamp", web::post().to(handlers::clamp_device))
                .route("/devices/{id}/release", web::post().to(handlers::release_device))
                .route(
                    "/devices/{id}/calibration/tare",
                    web::post().to(handlers::tare_device),
                )
                .route(
                    "/devices/{id}/calibration/span",
                    web::post().to(handlers::span_device),
                )
                .route("/alerts", web::get().to(handlers::list_alerts))
                .route(
                    "/alerts/{id}/acknowledge",
                    web::post().to(handlers::acknowledge_alert),
                )
                .route("/alerts/{id}/resolve", web::post().to(handlers::resolve_alert))
                .route("/alerts/{id}/escalate", web::post().to(handlers::escalate_alert)),
        );
}
