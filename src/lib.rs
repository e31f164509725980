//! Drip-Sense Control Center core library
//!
//! This module exports the core functionality of the Drip-Sense IV drip
//! monitoring service: signal processing, safety evaluation, persistence,
//! the live event feed and the HTTP surface.

pub mod api;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod monitor;
pub mod sensing;
pub mod ui;
pub mod websocket;

pub use error::{AppError, Result};

use std::sync::Arc;

/// Application configuration
pub mod config {
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(default)]
    pub struct Config {
        pub server: ServerConfig,
        pub database: DatabaseConfig,
        pub websocket: WebSocketConfig,
        pub sensor: SensorConfig,
        pub safety: SafetyConfig,
        pub monitor: MonitorConfig,
        pub log: LogConfig,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct ServerConfig {
        pub host: String,
        pub port: u16,
        pub static_dir: String,
        pub cors_origins: Vec<String>,
    }

    impl Default for ServerConfig {
        fn default() -> Self {
            Self {
                host: "127.0.0.1".into(),
                port: 8080,
                static_dir: "./static".into(),
                cors_origins: Vec::new(),
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct DatabaseConfig {
        pub url: String,
        pub max_connections: u32,
    }

    impl Default for DatabaseConfig {
        fn default() -> Self {
            Self {
                url: "sqlite://dripsense.db?mode=rwc".into(),
                max_connections: 5,
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct WebSocketConfig {
        /// Heartbeat interval in seconds
        pub ping_interval: u64,
    }

    impl Default for WebSocketConfig {
        fn default() -> Self {
            Self { ping_interval: 5 }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum FilterKind {
        Ema,
        Kalman,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct SensorConfig {
        pub filter: FilterKind,
        pub ema_alpha: f32,
        pub kalman_q: f32,
        pub kalman_r: f32,
        /// Number of samples in the flow sliding window
        pub flow_window: usize,
        /// Fluid density in g/mL
        pub fluid_density: f32,
    }

    impl Default for SensorConfig {
        fn default() -> Self {
            Self {
                filter: FilterKind::Ema,
                ema_alpha: 0.3,
                kalman_q: 0.01,
                kalman_r: 0.5,
                flow_window: 10,
                fluid_density: crate::sensing::units::SALINE_DENSITY,
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct SafetyConfig {
        pub low_fluid_threshold_g: f32,
        pub free_flow_multiplier: f32,
        pub flow_stall_timeout_ms: u64,
        pub flow_stall_delta_g: f32,
        /// Drive the device to clamped on free flow / air detection
        pub auto_clamp: bool,
    }

    impl Default for SafetyConfig {
        fn default() -> Self {
            Self {
                low_fluid_threshold_g: 10.0,
                free_flow_multiplier: 1.5,
                flow_stall_timeout_ms: 30_000,
                flow_stall_delta_g: 0.5,
                auto_clamp: true,
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct MonitorConfig {
        pub offline_after_secs: i64,
        pub watchdog_interval_secs: u64,
        /// Telemetry rows shown on the patient page
        pub history_limit: i64,
    }

    impl Default for MonitorConfig {
        fn default() -> Self {
            Self {
                offline_after_secs: 30,
                watchdog_interval_secs: 10,
                history_limit: 50,
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct LogConfig {
        pub level: String,
        pub json: bool,
    }

    impl Default for LogConfig {
        fn default() -> Self {
            Self {
                level: "info".into(),
                json: false,
            }
        }
    }

    /// Load configuration from file
    pub fn load_config() -> Result<Config, ::config::ConfigError> {
        // Override with environment-specific settings
        let env = std::env::var("DRIPSENSE_ENV").unwrap_or_else(|_| "development".into());

        ::config::Config::builder()
            .add_source(::config::File::with_name("config/default").required(false))
            .add_source(::config::File::with_name(&format!("config/{}", env)).required(false))
            // Override with environment variables, e.g. DRIPSENSE_SERVER__PORT=9000
            .add_source(
                ::config::Environment::with_prefix("DRIPSENSE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

/// Shared state handed to every request handler
pub struct AppState {
    pub db: db::Database,
    pub engine: Arc<monitor::MonitorEngine>,
    pub bus: events::EventBus,
    pub pages: ui::Pages,
    pub config: config::Config,
}

impl AppState {
    /// Wire the engine, bus and templates around an open database
    pub fn new(db: db::Database, config: config::Config) -> Result<Self> {
        let bus = events::EventBus::new(events::DEFAULT_CAPACITY);
        let engine = Arc::new(monitor::MonitorEngine::new(
            db.clone(),
            bus.clone(),
            config.sensor.clone(),
            config.safety.clone(),
        ));
        let pages = ui::Pages::new()?;

        Ok(Self {
            db,
            engine,
            bus,
            pages,
            config,
        })
    }
}
