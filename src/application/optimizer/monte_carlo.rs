//! Monte Carlo portfolio projection.
//!
//! A seeded geometric random walk over the current portfolio value,
//! served to the dashboard for "where could this go" bands. It feeds no
//! trading decision anywhere; determinism (same seed, same bands) keeps
//! the endpoint cheap to cache and to test.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonteCarloRequest {
    pub days: usize,
    pub iterations: usize,
    /// Annualized drift, e.g. 0.05.
    pub drift: f64,
    /// Annualized volatility, e.g. 0.6.
    pub volatility: f64,
    pub seed: u64,
}

impl Default for MonteCarloRequest {
    fn default() -> Self {
        Self {
            days: 90,
            iterations: 1000,
            drift: 0.05,
            volatility: 0.6,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    pub initial_value: f64,
    pub days: usize,
    pub iterations: usize,
    pub p5: f64,
    pub p50: f64,
    pub p95: f64,
    pub mean_final: f64,
}

pub fn run(initial_value: f64, request: &MonteCarloRequest) -> MonteCarloResult {
    let days = request.days.max(1);
    let iterations = request.iterations.clamp(1, 100_000);

    let dt = 1.0 / 365.0;
    let drift_term = (request.drift - 0.5 * request.volatility.powi(2)) * dt;
    let vol_term = request.volatility * dt.sqrt();

    let mut rng = StdRng::seed_from_u64(request.seed);
    let mut finals: Vec<f64> = Vec::with_capacity(iterations);

    for _ in 0..iterations {
        let mut value = initial_value;
        for _ in 0..days {
            value *= (drift_term + vol_term * standard_normal(&mut rng)).exp();
        }
        finals.push(value);
    }

    finals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mean_final = finals.iter().sum::<f64>() / finals.len() as f64;

    MonteCarloResult {
        initial_value,
        days,
        iterations,
        p5: percentile(&finals, 0.05),
        p50: percentile(&finals, 0.50),
        p95: percentile(&finals, 0.95),
        mean_final,
    }
}

/// Box-Muller transform; two uniforms in, one standard normal out.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[index]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_bands() {
        let request = MonteCarloRequest::default();
        let a = run(100_000.0, &request);
        let b = run(100_000.0, &request);
        assert_eq!(a.p5, b.p5);
        assert_eq!(a.p50, b.p50);
        assert_eq!(a.p95, b.p95);
    }

    #[test]
    fn test_different_seed_different_bands() {
        let a = run(100_000.0, &MonteCarloRequest::default());
        let b = run(
            100_000.0,
            &MonteCarloRequest {
                seed: 43,
                ..Default::default()
            },
        );
        assert_ne!(a.p50, b.p50);
    }

    #[test]
    fn test_bands_are_ordered() {
        let result = run(50_000.0, &MonteCarloRequest::default());
        assert!(result.p5 <= result.p50);
        assert!(result.p50 <= result.p95);
        assert!(result.p5 > 0.0);
    }

    #[test]
    fn test_zero_volatility_is_pure_drift() {
        let result = run(
            100_000.0,
            &MonteCarloRequest {
                volatility: 0.0,
                drift: 0.0,
                ..Default::default()
            },
        );
        assert!((result.p50 - 100_000.0).abs() < 1e-6);
        assert_eq!(result.p5, result.p95);
    }
}
