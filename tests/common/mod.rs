//! Shared fixtures for the HTTP integration tests

use actix_web::web;
use dripsense::config::Config;
use dripsense::db::Database;
use dripsense::AppState;

/// Fresh application state on a private in-memory database
pub async fn state() -> web::Data<AppState> {
    let db = Database::connect_in_memory()
        .await
        .expect("in-memory database");
    db.run_migrations().await.expect("migrations");
    web::Data::new(AppState::new(db, Config::default()).expect("app state"))
}

/// Initialise the full application the way `main` wires it
#[macro_export]
macro_rules! dripsense_app {
    ($state:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data($state.clone())
                .wrap(dripsense::api::middleware::security_headers())
                .configure(dripsense::api::configure)
                .service(dripsense::websocket::websocket_route())
                .configure(dripsense::ui::configure),
        )
        .await
    };
}
