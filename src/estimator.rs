// src/estimator.rs
//! Windowed error estimator.
//!
//! Instead of running accumulators, every call recomputes the integral and
//! derivative terms from a bounded window of recent `(timestamp, error)`
//! samples: the integral by the trapezoidal rule and the derivative as the
//! least-squares slope through the window. Old contributions drop out
//! completely once they leave the window, so there is no wind-up.

use std::collections::VecDeque;

/// Weights applied to the proportional, integral and derivative terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl ControlGains {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }

    pub fn weigh(&self, terms: Terms) -> f64 {
        self.kp * terms.p + self.ki * terms.i + self.kd * terms.d
    }
}

/// Unweighted proportional, integral and derivative signals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Terms {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

#[derive(Debug, Clone)]
pub struct WindowedEstimator {
    gains: ControlGains,
    max_count: usize,
    max_age: f64,
    samples: VecDeque<(f64, f64)>,
}

impl WindowedEstimator {
    /// `max_count` samples at most, none older than `max_age` seconds
    /// relative to the newest.
    pub fn new(gains: ControlGains, max_count: usize, max_age: f64) -> Self {
        tracing::debug!(
            "estimator gains ({}, {}, {}), keep {}, expire in {}s",
            gains.kp, gains.ki, gains.kd, max_count, max_age
        );
        Self {
            gains,
            max_count: max_count.max(1),
            max_age,
            samples: VecDeque::new(),
        }
    }

    /// Record a sample and return the unweighted terms over the window.
    pub fn push(&mut self, timestamp: f64, error: f64) -> Terms {
        self.samples.push_back((timestamp, error));
        self.evict(timestamp);

        if self.samples.len() < 2 {
            return Terms { p: error, i: 0.0, d: 0.0 };
        }
        Terms {
            p: error,
            i: self.trapezoid(),
            d: self.slope(),
        }
    }

    /// Record a sample and return the weighted sum of the terms.
    pub fn weighted(&mut self, timestamp: f64, error: f64) -> f64 {
        let terms = self.push(timestamp, error);
        let g = self.gains;
        tracing::debug!(
            "{:.4} + {:.4} + {:.4}",
            g.kp * terms.p,
            g.ki * terms.i,
            g.kd * terms.d
        );
        g.weigh(terms)
    }

    /// New weights, effective from the next estimate.
    pub fn change_gains(&mut self, gains: ControlGains) {
        self.gains = gains;
    }

    /// New window bounds, applied at the next push.
    pub fn set_window(&mut self, max_count: usize, max_age: f64) {
        self.max_count = max_count.max(1);
        self.max_age = max_age;
    }

    pub fn gains(&self) -> ControlGains {
        self.gains
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &(f64, f64)> {
        self.samples.iter()
    }

    // Age first, then count.
    fn evict(&mut self, now: f64) {
        self.samples.retain(|(t, _)| now - t <= self.max_age);
        while self.samples.len() > self.max_count {
            self.samples.pop_front();
        }
    }

    fn trapezoid(&self) -> f64 {
        self.samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .map(|((t0, e0), (t1, e1))| (t1 - t0) * (e0 + e1) / 2.0)
            .sum()
    }

    fn slope(&self) -> f64 {
        let n = self.samples.len() as f64;
        let mean_t = self.samples.iter().map(|(t, _)| t).sum::<f64>() / n;
        let mean_e = self.samples.iter().map(|(_, e)| e).sum::<f64>() / n;
        let (num, den) = self.samples.iter().fold((0.0, 0.0), |(num, den), (t, e)| {
            let dt = t - mean_t;
            (num + dt * (e - mean_e), den + dt * dt)
        });
        // All timestamps equal: no slope can be fitted.
        if den == 0.0 { 0.0 } else { num / den }
    }
}
