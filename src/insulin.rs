//! Rapid-acting insulin action model
//!
//! Two-parameter exponential insulin curve, parameterized by total action
//! duration `td` and time to peak activity `tp` (both minutes):
//!
//! - `tau = tp·(1 − tp/td) / (1 − 2·tp/td)` (decay time constant)
//! - `a = 2·tau/td` (rise-time factor)
//! - `S = 1 / (1 − a + (1 + a)·e^(−td/tau))` (normalizing scale)
//! - `Ia(t) = (S/tau²)·t·(1 − t/td)·e^(−t/tau)` (activity rate)
//! - `IOB(t) = 1 − S·(1 − a)·((t²/(tau·td·(1 − a)) − t/tau − 1)·e^(−t/tau) + 1)`
//!
//! `IOB(t)` is the fraction of a dose still on board `t` minutes after it was
//! given. It starts at 1 and decays to 0 at `td`.

use serde::{Deserialize, Serialize};

use crate::config::InsulinConfig;
use crate::error::ComputeError;

/// Insulin activity and on-board curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InsulinCurve {
    action_minutes: f64,
    peak_minutes: f64,
    tau: f64,
    rise: f64,
    scale: f64,
}

impl Default for InsulinCurve {
    fn default() -> Self {
        let defaults = InsulinConfig::default();
        Self::derive(defaults.action_minutes, defaults.peak_minutes)
    }
}

impl InsulinCurve {
    /// Build a curve; `tp` must lie strictly inside `(0, td/2)`
    pub fn new(action_minutes: f64, peak_minutes: f64) -> Result<Self, ComputeError> {
        let valid = action_minutes.is_finite()
            && peak_minutes.is_finite()
            && peak_minutes > 0.0
            && peak_minutes < action_minutes / 2.0;
        if !valid {
            return Err(ComputeError::InvalidConfig(format!(
                "insulin peak {peak_minutes} min must be within (0, {}) for action {action_minutes} min",
                action_minutes / 2.0
            )));
        }
        Ok(Self::derive(action_minutes, peak_minutes))
    }

    pub fn from_config(config: &InsulinConfig) -> Result<Self, ComputeError> {
        Self::new(config.action_minutes, config.peak_minutes)
    }

    fn derive(td: f64, tp: f64) -> Self {
        let tau = tp * (1.0 - tp / td) / (1.0 - 2.0 * tp / td);
        let rise = 2.0 * tau / td;
        let scale = 1.0 / (1.0 - rise + (1.0 + rise) * (-td / tau).exp());
        Self {
            action_minutes: td,
            peak_minutes: tp,
            tau,
            rise,
            scale,
        }
    }

    pub fn action_minutes(&self) -> f64 {
        self.action_minutes
    }

    pub fn peak_minutes(&self) -> f64 {
        self.peak_minutes
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn rise_factor(&self) -> f64 {
        self.rise
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Activity rate `Ia(t)` (fraction of the dose acting per minute)
    pub fn activity(&self, t: f64) -> f64 {
        let (td, tau, s) = (self.action_minutes, self.tau, self.scale);
        (s / (tau * tau)) * t * (1.0 - t / td) * (-t / tau).exp()
    }

    /// Fraction of a dose still on board `t` minutes after injection
    pub fn on_board(&self, t: f64) -> f64 {
        let (td, tau, a, s) = (self.action_minutes, self.tau, self.rise, self.scale);
        1.0 - s * (1.0 - a) * ((t * t / (tau * td * (1.0 - a)) - t / tau - 1.0) * (-t / tau).exp() + 1.0)
    }

    /// On-board fractions at `0, Δ, 2Δ, …` while `kΔ < td`
    pub fn kernel(&self, bin_minutes: u32) -> Vec<f64> {
        let step = f64::from(bin_minutes);
        if step <= 0.0 {
            return Vec::new();
        }
        (0..)
            .map(|k| k as f64 * step)
            .take_while(|&t| t < self.action_minutes)
            .map(|t| self.on_board(t))
            .collect()
    }

    /// Insulin-on-board series for a per-bin dose column.
    ///
    /// Each non-zero dose adds `dose · kernel` into the output starting at its
    /// own bin. Doses superpose; a dose whose curve runs past the last bin is
    /// truncated there.
    pub fn accumulate(&self, doses: &[Option<f64>], bin_minutes: u32) -> Vec<f64> {
        let kernel = self.kernel(bin_minutes);
        let mut on_board = vec![0.0; doses.len()];
        for (i, dose) in doses.iter().enumerate() {
            let dose = dose.unwrap_or(0.0);
            if dose == 0.0 {
                continue;
            }
            let end = (i + kernel.len()).min(on_board.len());
            for (slot, fraction) in on_board[i..end].iter_mut().zip(&kernel) {
                *slot += dose * fraction;
            }
        }
        on_board
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_default_parameters() {
        let curve = InsulinCurve::default();
        assert!((curve.tau() - 70.92105263157895).abs() < EPS);
        assert!((curve.rise_factor() - 0.4728070175438596).abs() < EPS);
        assert!((curve.scale() - 1.8227398194123998).abs() < EPS);
    }

    #[test]
    fn test_on_board_closed_form_values() {
        let curve = InsulinCurve::default();
        // IOB(0) comes out of the formula, not a constant
        assert!((curve.on_board(0.0) - 1.0).abs() < EPS);
        assert!((curve.on_board(55.0) - 0.7053625074116086).abs() < EPS);
        assert!((curve.on_board(150.0) - 0.1676279458476052).abs() < EPS);
        // Fully absorbed at the end of the action window
        assert!(curve.on_board(300.0).abs() < 1e-12);
    }

    #[test]
    fn test_activity_values() {
        let curve = InsulinCurve::default();
        assert_eq!(curve.activity(0.0), 0.0);
        assert!((curve.activity(55.0) - 0.007495179744488486).abs() < EPS);
        assert!(curve.activity(300.0).abs() < 1e-15);
    }

    #[test]
    fn test_kernel_stops_before_action_duration() {
        let curve = InsulinCurve::default();
        let kernel = curve.kernel(15);
        assert_eq!(kernel.len(), 20);
        assert!(kernel.iter().all(|&f| f > 0.0 && f <= 1.0 + EPS));
        assert!(kernel.windows(2).all(|w| w[1] <= w[0]));

        // Bin width that does not divide td
        assert_eq!(curve.kernel(7).len(), 43);
    }

    #[test]
    fn test_accumulate_single_dose() {
        let curve = InsulinCurve::default();
        let mut doses = vec![Some(0.0); 30];
        doses[0] = Some(10.0);
        let iob = curve.accumulate(&doses, 15);

        assert_eq!(iob[0], 10.0 * curve.on_board(0.0));
        assert!((iob[4] - 6.679385666679527).abs() < 1e-6);
        assert!((iob[4] - 10.0 * curve.on_board(60.0)).abs() < 1e-12);
        // Nothing left once the action window has passed
        assert!(iob[20..].iter().all(|&v| v == 0.0));
        assert!(iob.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_accumulate_superposes_and_truncates() {
        let curve = InsulinCurve::default();
        let kernel = curve.kernel(15);
        let mut doses = vec![Some(0.0); 10];
        doses[2] = Some(4.0);
        doses[3] = Some(2.0);
        doses[9] = Some(1.0);
        let iob = curve.accumulate(&doses, 15);

        assert_eq!(iob.len(), 10);
        assert_eq!(iob[0], 0.0);
        assert_eq!(iob[1], 0.0);
        assert!((iob[5] - (4.0 * kernel[3] + 2.0 * kernel[2])).abs() < 1e-12);
        // Dose in the last bin only contributes its own bin
        assert!((iob[9] - (4.0 * kernel[7] + 2.0 * kernel[6] + 1.0 * kernel[0])).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_degenerate_peak() {
        assert!(InsulinCurve::new(300.0, 150.0).is_err());
        assert!(InsulinCurve::new(300.0, 0.0).is_err());
        assert!(InsulinCurve::new(300.0, 75.0).is_ok());
    }
}
