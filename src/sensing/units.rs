//! Physical constants and unit conversions

/// g/mL at 25C
pub const WATER_DENSITY: f32 = 1.0;
/// g/mL for 0.9% NaCl
pub const SALINE_DENSITY: f32 = 1.0046;

/// Standard drip factors (drops per mL)
pub const DRIP_FACTOR_MACRO: u32 = 20;
pub const DRIP_FACTOR_MICRO: u32 = 60;
pub const DRIP_FACTOR_BLOOD: u32 = 10;

/// Below this rate the bag is considered not to be draining
pub const MIN_FLOW_ML_MIN: f32 = 0.01;

pub fn grams_to_ml(weight_g: f32, density: f32) -> f32 {
    weight_g / density
}

/// Minutes until the bag is empty, `None` while nothing is flowing
pub fn time_to_empty_min(weight_g: f32, rate_ml_min: f32, density: f32) -> Option<f32> {
    if rate_ml_min < MIN_FLOW_ML_MIN {
        return None;
    }
    Some(grams_to_ml(weight_g.max(0.0), density) / rate_ml_min)
}

pub fn drops_per_minute(rate_ml_min: f32, drip_factor: u32) -> f32 {
    rate_ml_min * drip_factor as f32
}

pub fn ml_per_hour(rate_ml_min: f32) -> f32 {
    rate_ml_min * 60.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_to_empty() {
        let eta = time_to_empty_min(100.0, 2.0, WATER_DENSITY).unwrap();
        assert!((eta - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_time_to_empty_without_flow() {
        assert_eq!(time_to_empty_min(500.0, 0.0, SALINE_DENSITY), None);
        assert_eq!(time_to_empty_min(500.0, 0.001, SALINE_DENSITY), None);
    }

    #[test]
    fn test_drip_conversions() {
        assert_eq!(drops_per_minute(1.5, DRIP_FACTOR_MACRO), 30.0);
        assert_eq!(drops_per_minute(1.0, DRIP_FACTOR_MICRO), 60.0);
        assert_eq!(drops_per_minute(2.0, DRIP_FACTOR_BLOOD), 20.0);
        assert_eq!(ml_per_hour(2.0), 120.0);
    }
}
