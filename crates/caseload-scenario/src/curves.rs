//! Regime-curve deviations for a policy state
//!
//! Maps a branch's mode and trigger timesteps to the deviation from baseline
//! of one category and signal. Nothing here depends on simulation history.

use caseload_calibration::RegimeCurves;
use caseload_core::{CoreError, PeriodSchedule, Regime};

use crate::policy::{PolicyMode, PolicyState};

/// Fixed offsets used when chaining regime curves onto policy timesteps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveTiming {
    /// Start of the voluntary-decline regime on the study axis
    pub voluntary_start: usize,
    /// Days already elapsed on the suspension curve when a suspension begins
    pub suspension_offset: usize,
}

impl CurveTiming {
    pub fn from_schedule(schedule: &PeriodSchedule, suspension_offset: usize) -> Result<Self, CoreError> {
        Ok(Self {
            voluntary_start: schedule.indices(Regime::VoluntaryDecline)?.start.start,
            suspension_offset,
        })
    }

    fn since_voluntary(&self, t: usize) -> f64 {
        t as f64 - self.voluntary_start as f64
    }
}

/// Deviation from baseline on day `t` for a branch in `state`.
///
/// `recovery_target` is the level the recovery curve converges to on day `t`.
pub fn deviation(
    state: &PolicyState,
    curves: &RegimeCurves,
    recovery_target: f64,
    t: usize,
    timing: &CurveTiming,
) -> f64 {
    let decline = curves.curve(Regime::VoluntaryDecline);
    let suspension = curves.curve(Regime::Suspension);
    let recovery = curves.curve(Regime::Recovery);
    let offset = timing.suspension_offset as f64;

    match (state.mode, state.suspended_at, state.recovering_at, state.voluntary_recovery_at) {
        (PolicyMode::Suspended, Some(ts), _, _) => {
            let entry = decline.evaluate(timing.since_voluntary(ts));
            suspension
                .with_start(entry)
                .evaluate(t as f64 - ts as f64 + offset)
        }
        (PolicyMode::Recovering, Some(ts), Some(tr), _) => {
            let entry = decline.evaluate(timing.since_voluntary(ts));
            let trough = suspension
                .with_start(entry)
                .evaluate(tr as f64 - ts as f64);
            recovery
                .with_start(trough)
                .with_end(recovery_target)
                .evaluate(t as f64 - tr as f64)
        }
        (PolicyMode::VoluntaryRecovery, _, _, Some(tv)) => recovery
            .with_start(decline.evaluate(timing.since_voluntary(tv)))
            .with_end(recovery_target)
            .evaluate(t as f64 - tv as f64),
        _ => decline.evaluate(timing.since_voluntary(t)),
    }
}

/// Fitted deviation on historical day `t`, read from the regime governing it
pub fn historical_deviation(
    curves: &RegimeCurves,
    schedule: &PeriodSchedule,
    t: usize,
) -> Result<f64, CoreError> {
    let regime = schedule.regime_at(t)?;
    let local = t as f64 - schedule.indices(regime)?.start.start as f64;
    Ok(curves.curve(regime).evaluate(local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Branch;
    use approx::assert_relative_eq;
    use caseload_calibration::FitOutcome;
    use caseload_core::LogisticCurve;

    fn converged(curve: LogisticCurve) -> FitOutcome {
        FitOutcome::Converged { curve, loss: 0.0 }
    }

    fn curves() -> RegimeCurves {
        RegimeCurves {
            suspension: converged(LogisticCurve::new(0.0, -40.0, 0.5, 10.0)),
            recovery: converged(LogisticCurve::new(-40.0, -5.0, 0.2, 20.0)),
            voluntary_decline: converged(LogisticCurve::new(-5.0, -15.0, 0.3, 30.0)),
        }
    }

    fn timing() -> CurveTiming {
        CurveTiming {
            voluntary_start: 184,
            suspension_offset: 14,
        }
    }

    #[test]
    fn test_reduction_follows_decline_curve() {
        let state = PolicyState {
            mode: PolicyMode::VoluntaryReduction,
            ..PolicyState::new(Branch::NoAction)
        };
        let value = deviation(&state, &curves(), 0.0, 214, &timing());
        assert_relative_eq!(value, -10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_suspension_continues_from_decline_level() {
        let state = PolicyState {
            mode: PolicyMode::Suspended,
            suspended_at: Some(214),
            ..PolicyState::new(Branch::Action)
        };
        // Entry at the decline midpoint (-10), then 14 days into the suspension curve
        let entry = deviation(&state, &curves(), 0.0, 214, &timing());
        let expected = LogisticCurve::new(-10.0, -40.0, 0.5, 10.0).evaluate(14.0);
        assert_relative_eq!(entry, expected, epsilon = 1e-12);
        let later = deviation(&state, &curves(), 0.0, 220, &timing());
        assert!(later < entry);
    }

    #[test]
    fn test_recovery_is_continuous_and_reaches_target() {
        let suspended = PolicyState {
            mode: PolicyMode::Suspended,
            suspended_at: Some(214),
            ..PolicyState::new(Branch::Action)
        };
        let recovering = PolicyState {
            mode: PolicyMode::Recovering,
            recovering_at: Some(240),
            ..suspended.clone()
        };
        let trough = LogisticCurve::new(-10.0, -40.0, 0.5, 10.0).evaluate(26.0);
        let first = deviation(&recovering, &curves(), 3.0, 240, &timing());
        let expected = LogisticCurve::new(trough, 3.0, 0.2, 20.0).evaluate(0.0);
        assert_relative_eq!(first, expected, epsilon = 1e-12);
        let late = deviation(&recovering, &curves(), 3.0, 600, &timing());
        assert_relative_eq!(late, 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_voluntary_recovery_targets_anchor() {
        let state = PolicyState {
            mode: PolicyMode::VoluntaryRecovery,
            voluntary_recovery_at: Some(214),
            ..PolicyState::new(Branch::NoAction)
        };
        let late = deviation(&state, &curves(), -2.0, 700, &timing());
        assert_relative_eq!(late, -2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_historical_deviation_uses_local_time() {
        let schedule = PeriodSchedule::default();
        let curves = curves();
        // Day 0 is the first suspension day
        assert_relative_eq!(
            historical_deviation(&curves, &schedule, 10).unwrap(),
            -20.0,
            epsilon = 1e-12
        );
        let p3 = schedule.indices(Regime::VoluntaryDecline).unwrap().start.start;
        assert_relative_eq!(
            historical_deviation(&curves, &schedule, p3 + 30).unwrap(),
            -10.0,
            epsilon = 1e-12
        );
    }
}
