//! Signal processing and safety logic for drip monitoring
//!
//! Everything in here is synchronous and free of I/O so it can be driven
//! by the monitoring engine, the benchmarks and the tests alike.

pub mod calibration;
pub mod fusion;
pub mod safety;
pub mod state;
pub mod units;

pub use calibration::Calibration;
pub use fusion::{EmaFilter, FlowCalculator, Kalman1d, WeightFilter};
pub use safety::{SafetyController, SafetyEvent, SafetySample};
pub use state::{DeviceState, StateMachine};
