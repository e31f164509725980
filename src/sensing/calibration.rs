//! Load cell calibration (tare and span)

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Samples averaged for a tare
pub const TARE_SAMPLES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub zero_offset: f64,
    pub scale_factor: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            zero_offset: 0.0,
            scale_factor: 1.0,
        }
    }
}

impl Calibration {
    /// Convert raw ADC counts to grams
    pub fn to_grams(&self, raw: i64) -> f32 {
        ((raw as f64 - self.zero_offset) / self.scale_factor) as f32
    }

    /// Zero the scale with the empty hook loaded.
    pub fn tare(&self, samples: &[i64]) -> Result<Self> {
        if samples.len() < TARE_SAMPLES {
            return Err(AppError::Calibration(format!(
                "tare needs at least {} samples, got {}",
                TARE_SAMPLES,
                samples.len()
            )));
        }
        Ok(Self {
            zero_offset: mean(samples),
            scale_factor: self.scale_factor,
        })
    }

    /// Derive the scale factor from a known reference weight.
    pub fn span(&self, samples: &[i64], known_weight_g: f64) -> Result<Self> {
        if samples.is_empty() {
            return Err(AppError::Calibration("span needs at least one sample".into()));
        }
        if known_weight_g <= 0.0 {
            return Err(AppError::Calibration(format!(
                "reference weight must be positive, got {}",
                known_weight_g
            )));
        }

        let scale_factor = (mean(samples) - self.zero_offset) / known_weight_g;
        if scale_factor.abs() < f64::EPSILON {
            return Err(AppError::Calibration(
                "reference weight produced no reading change".into(),
            ));
        }

        Ok(Self {
            zero_offset: self.zero_offset,
            scale_factor,
        })
    }
}

fn mean(samples: &[i64]) -> f64 {
    samples.iter().map(|&s| s as f64).sum::<f64>() / samples.len() as f64
}
