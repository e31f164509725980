//! Domain records shared by the store, the engine and the HTTP layer

pub mod alert;
pub mod device;
pub mod infusion;
pub mod patient;
pub mod telemetry;

pub use alert::{AcknowledgeAlert, Alert, AlertKind, AlertSeverity, AlertStatus};
pub use device::{CalibrationSamples, Device, DeviceStatus, NewDevice};
pub use infusion::{EndInfusion, InfusionSession, InfusionStatus, NewInfusion};
pub use patient::{ClinicalNote, NewClinicalNote, NewPatient, Patient, PatientStatus};
pub use telemetry::{Reading, TelemetryBatch, TelemetryRecord, TelemetrySnapshot};

/// Enums persisted as TEXT columns: snake_case names, `Display` and `FromStr`.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {}: {}", stringify!($name), other)),
                }
            }
        }
    };
}

pub(crate) use text_enum;
