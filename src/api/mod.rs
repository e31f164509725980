//! API module for the Drip-Sense Control Center
//!
//! This module contains the JSON API and its middleware.

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use routes::configure;
