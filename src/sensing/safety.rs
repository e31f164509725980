//! Safety detectors with debounce
//!
//! Each detector is a plain predicate; `SafetyController` adds the sample
//! debounce and the stall anchor, and resolves competing events by
//! clinical priority: air > free flow > low fluid > stall.

use serde::{Deserialize, Serialize};

use crate::config::SafetyConfig;

/// Consecutive samples before a low-fluid alarm fires
pub const LOW_FLUID_DEBOUNCE: u8 = 3;
/// Consecutive samples before a free-flow alarm fires
pub const FREE_FLOW_DEBOUNCE: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyEvent {
    None,
    LowFluid,
    FreeFlow,
    FlowStall,
    AirDetect,
}

impl SafetyEvent {
    pub fn is_alarm(&self) -> bool {
        !matches!(self, SafetyEvent::None)
    }

    /// Events that warrant clamping the line
    pub fn is_critical(&self) -> bool {
        matches!(self, SafetyEvent::FreeFlow | SafetyEvent::AirDetect)
    }
}

/// Input to one evaluation round
#[derive(Debug, Clone, Copy)]
pub struct SafetySample {
    pub weight_g: f32,
    pub flow_rate_ml_min: f32,
    /// Prescribed rate, absent when no infusion session is running
    pub expected_rate_ml_min: Option<f32>,
    pub timestamp_ms: u64,
    pub air_detected: bool,
}

#[derive(Debug, Clone)]
pub struct SafetyController {
    config: SafetyConfig,
    low_fluid_count: u8,
    free_flow_count: u8,
    stall_anchor: Option<(f32, u64)>,
}

impl SafetyController {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            config,
            low_fluid_count: 0,
            free_flow_count: 0,
            stall_anchor: None,
        }
    }

    pub fn detect_low_fluid(&self, weight_g: f32) -> bool {
        weight_g < self.config.low_fluid_threshold_g
    }

    pub fn detect_free_flow(&self, flow_rate: f32, expected_rate: f32) -> bool {
        expected_rate > 0.0 && flow_rate > expected_rate * self.config.free_flow_multiplier
    }

    pub fn detect_flow_stall(&self, delta_weight: f32, elapsed_ms: u64) -> bool {
        delta_weight.abs() < self.config.flow_stall_delta_g
            && elapsed_ms >= self.config.flow_stall_timeout_ms
    }

    pub fn evaluate(&mut self, sample: &SafetySample) -> SafetyEvent {
        self.low_fluid_count = if self.detect_low_fluid(sample.weight_g) {
            self.low_fluid_count.saturating_add(1)
        } else {
            0
        };

        let free_flow = sample
            .expected_rate_ml_min
            .map(|expected| self.detect_free_flow(sample.flow_rate_ml_min, expected))
            .unwrap_or(false);
        self.free_flow_count = if free_flow {
            self.free_flow_count.saturating_add(1)
        } else {
            0
        };

        let stalled = self.track_stall(sample);

        if sample.air_detected {
            SafetyEvent::AirDetect
        } else if self.free_flow_count >= FREE_FLOW_DEBOUNCE {
            SafetyEvent::FreeFlow
        } else if self.low_fluid_count >= LOW_FLUID_DEBOUNCE {
            SafetyEvent::LowFluid
        } else if stalled {
            SafetyEvent::FlowStall
        } else {
            SafetyEvent::None
        }
    }

    fn track_stall(&mut self, sample: &SafetySample) -> bool {
        if sample.expected_rate_ml_min.is_none() {
            self.stall_anchor = None;
            return false;
        }

        let (anchor_weight, anchor_ts) = *self
            .stall_anchor
            .get_or_insert((sample.weight_g, sample.timestamp_ms));

        let delta = anchor_weight - sample.weight_g;
        if delta.abs() >= self.config.flow_stall_delta_g {
            self.stall_anchor = Some((sample.weight_g, sample.timestamp_ms));
            return false;
        }

        let elapsed = sample.timestamp_ms.saturating_sub(anchor_ts);
        self.detect_flow_stall(delta, elapsed)
    }

    pub fn reset(&mut self) {
        self.low_fluid_count = 0;
        self.free_flow_count = 0;
        self.stall_anchor = None;
    }
}
