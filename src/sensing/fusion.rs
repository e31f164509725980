//! Weight filtering and flow estimation
//!
//! The load cell delivers noisy weight samples; they are smoothed with an
//! EMA or a scalar Kalman filter, then a sliding window over the smoothed
//! weights yields the flow rate in mL/min.

use std::collections::VecDeque;

use crate::config::{FilterKind, SensorConfig};

use super::units::grams_to_ml;

/// Exponential moving average
#[derive(Debug, Clone)]
pub struct EmaFilter {
    alpha: f32,
    last_value: f32,
    initialized: bool,
}

impl EmaFilter {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            last_value: 0.0,
            initialized: false,
        }
    }

    /// `y = alpha*x + (1-alpha)*y_prev`; the first sample seeds the output.
    pub fn update(&mut self, value: f32) -> f32 {
        if !self.initialized {
            self.last_value = value;
            self.initialized = true;
        } else {
            self.last_value = self.alpha * value + (1.0 - self.alpha) * self.last_value;
        }
        self.last_value
    }

    pub fn reset(&mut self) {
        self.initialized = false;
        self.last_value = 0.0;
    }
}

/// One-dimensional Kalman filter for a slowly varying level
#[derive(Debug, Clone)]
pub struct Kalman1d {
    x_est: f32,
    p: f32,
    q: f32,
    r: f32,
    k: f32,
    initialized: bool,
}

impl Kalman1d {
    pub fn new(q: f32, r: f32) -> Self {
        Self {
            x_est: 0.0,
            p: 1.0,
            q,
            r,
            k: 0.0,
            initialized: false,
        }
    }

    pub fn update(&mut self, measurement: f32) -> f32 {
        if !self.initialized {
            self.x_est = measurement;
            self.initialized = true;
            return self.x_est;
        }

        // predict
        self.p += self.q;

        // update
        self.k = self.p / (self.p + self.r);
        self.x_est += self.k * (measurement - self.x_est);
        self.p *= 1.0 - self.k;

        self.x_est
    }

    pub fn gain(&self) -> f32 {
        self.k
    }

    pub fn reset(&mut self) {
        self.x_est = 0.0;
        self.p = 1.0;
        self.k = 0.0;
        self.initialized = false;
    }
}

/// Filter selected by configuration
#[derive(Debug, Clone)]
pub enum WeightFilter {
    Ema(EmaFilter),
    Kalman(Kalman1d),
}

impl WeightFilter {
    pub fn from_config(config: &SensorConfig) -> Self {
        match config.filter {
            FilterKind::Ema => WeightFilter::Ema(EmaFilter::new(config.ema_alpha)),
            FilterKind::Kalman => WeightFilter::Kalman(Kalman1d::new(config.kalman_q, config.kalman_r)),
        }
    }

    pub fn update(&mut self, value: f32) -> f32 {
        match self {
            WeightFilter::Ema(f) => f.update(value),
            WeightFilter::Kalman(f) => f.update(value),
        }
    }

    pub fn reset(&mut self) {
        match self {
            WeightFilter::Ema(f) => f.reset(),
            WeightFilter::Kalman(f) => f.reset(),
        }
    }
}

/// Sliding-window flow rate estimator
#[derive(Debug, Clone)]
pub struct FlowCalculator {
    window: VecDeque<(f32, u64)>,
    capacity: usize,
    density: f32,
}

impl FlowCalculator {
    pub fn new(capacity: usize, density: f32) -> Self {
        let capacity = capacity.max(2);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            density,
        }
    }

    /// Push a sample and return the flow rate in mL/min across the window.
    pub fn update(&mut self, weight_g: f32, timestamp_ms: u64) -> f32 {
        // out-of-order samples would produce a bogus slope
        if let Some(&(_, last_ts)) = self.window.back() {
            if timestamp_ms <= last_ts {
                return self.rate();
            }
        }

        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back((weight_g, timestamp_ms));
        self.rate()
    }

    pub fn rate(&self) -> f32 {
        let (Some(&(w_old, t_old)), Some(&(w_new, t_new))) = (self.window.front(), self.window.back()) else {
            return 0.0;
        };
        if self.window.len() < 2 || t_new <= t_old {
            return 0.0;
        }

        let delta_g = w_old - w_new;
        if delta_g <= 0.0 {
            return 0.0;
        }
        let dt_s = (t_new - t_old) as f32 / 1000.0;
        grams_to_ml(delta_g / dt_s, self.density) * 60.0
    }

    pub fn is_full(&self) -> bool {
        self.window.len() == self.capacity
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}
