//! Device operating state machine

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    #[default]
    Idle,
    Calibrating,
    Monitoring,
    LowFluid,
    FreeFlow,
    AirDetect,
    Clamped,
    Error,
    OtaUpdate,
}

impl DeviceState {
    pub const ALL: [DeviceState; 9] = [
        DeviceState::Idle,
        DeviceState::Calibrating,
        DeviceState::Monitoring,
        DeviceState::LowFluid,
        DeviceState::FreeFlow,
        DeviceState::AirDetect,
        DeviceState::Clamped,
        DeviceState::Error,
        DeviceState::OtaUpdate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DeviceState::Idle => "idle",
            DeviceState::Calibrating => "calibrating",
            DeviceState::Monitoring => "monitoring",
            DeviceState::LowFluid => "low_fluid",
            DeviceState::FreeFlow => "free_flow",
            DeviceState::AirDetect => "air_detect",
            DeviceState::Clamped => "clamped",
            DeviceState::Error => "error",
            DeviceState::OtaUpdate => "ota_update",
        }
    }

    pub fn can_transition_to(&self, to: DeviceState) -> bool {
        use DeviceState::*;

        match self {
            Idle => matches!(to, Calibrating | Monitoring | OtaUpdate | Error),
            Calibrating => matches!(to, Idle | Monitoring | Error),
            Monitoring => matches!(to, LowFluid | FreeFlow | AirDetect | Clamped | Idle | Error),
            LowFluid => matches!(to, Monitoring | Clamped | Idle | Error),
            FreeFlow | AirDetect => matches!(to, Clamped | Monitoring | Error),
            Clamped => matches!(to, Monitoring | Idle | Error),
            Error => matches!(to, Idle),
            OtaUpdate => matches!(to, Idle | Error),
        }
    }

    /// Readings in these states are recorded but not evaluated
    pub fn suspends_evaluation(&self) -> bool {
        matches!(
            self,
            DeviceState::Calibrating | DeviceState::OtaUpdate | DeviceState::Error
        )
    }

    pub fn is_alarm(&self) -> bool {
        matches!(
            self,
            DeviceState::LowFluid | DeviceState::FreeFlow | DeviceState::AirDetect
        )
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceState::ALL
            .into_iter()
            .find(|state| state.name() == s)
            .ok_or_else(|| format!("unknown device state: {}", s))
    }
}

#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: DeviceState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a persisted state
    pub fn with_state(current: DeviceState) -> Self {
        Self { current }
    }

    pub fn current(&self) -> DeviceState {
        self.current
    }

    /// Returns true when the state changed.
    pub fn transition(&mut self, to: DeviceState) -> bool {
        if self.current == to {
            return false;
        }
        if !self.current.can_transition_to(to) {
            tracing::warn!(from = %self.current, to = %to, "rejected state transition");
            return false;
        }
        tracing::debug!(from = %self.current, to = %to, "state transition");
        self.current = to;
        true
    }
}
