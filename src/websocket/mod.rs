//! Live patient feed over WebSocket

pub mod server;

pub use server::{websocket_route, PatientFeed};
