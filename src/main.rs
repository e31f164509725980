//! Drip-Sense Control Center
//!
//! Main entry point for the Drip-Sense Control Center.

use actix_files as fs;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dripsense::{api, config, db, ui, websocket, AppState};

fn init_tracing(log: &config::LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let registry = tracing_subscriber::registry().with(filter);

    if log.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Load configuration
    let config = config::load_config().context("Failed to load configuration")?;
    init_tracing(&config.log);

    // Connect to database
    let database = db::Database::connect(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("Failed to connect to database at {}", config.database.url))?;

    // Run migrations
    database
        .run_migrations()
        .await
        .context("Failed to run database migrations")?;

    // Create app state
    let state = AppState::new(database, config.clone()).context("Failed to build application state")?;
    let watchdog = state.engine.clone().spawn_watchdog(config.monitor.clone());
    let app_state = web::Data::new(state);

    let bind = (config.server.host.clone(), config.server.port);
    info!("Drip-Sense Control Center listening on {}:{}", bind.0, bind.1);

    let server_config = config.server.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(api::middleware::cors(&server_config))
            .wrap(api::middleware::security_headers())
            .wrap(TracingLogger::default())
            // API routes
            .configure(api::configure)
            // WebSocket route
            .service(websocket::server::websocket_route())
            .service(fs::Files::new("/static", &server_config.static_dir))
            // Dashboard pages
            .configure(ui::configure)
    })
    .bind(bind)
    .context("Failed to bind HTTP listener")?
    .run()
    .await
    .context("HTTP server error")?;

    watchdog.abort();
    Ok(())
}
