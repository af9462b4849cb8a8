//! Elective-procedure policy state machine
//!
//! Each simulated branch carries a [`PolicyState`]. [`transition`] advances it
//! one timestep from an ICU observation; the state never depends on anything
//! else, so the rules can be exercised without running a simulation.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    /// Elective procedures are cancelled when ICU capacity runs out
    Action,
    /// No capacity-triggered decisions; only voluntary patient behaviour
    NoAction,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::Action => write!(f, "action"),
            Branch::NoAction => write!(f, "no_action"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    Normal,
    Suspended,
    Recovering,
    VoluntaryReduction,
    VoluntaryRecovery,
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicyMode::Normal => "normal",
            PolicyMode::Suspended => "suspended",
            PolicyMode::Recovering => "recovering",
            PolicyMode::VoluntaryReduction => "voluntary_reduction",
            PolicyMode::VoluntaryRecovery => "voluntary_recovery",
        };
        f.write_str(name)
    }
}

/// Capacity fractions that trigger transitions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyThresholds {
    /// Census above this fraction of capacity suspends electives
    pub suspend_above: f64,
    /// Census below this fraction of capacity allows recovery
    pub release_below: f64,
    /// COVID ICU trend must fall below this fraction of its running peak
    pub trend_release: f64,
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            suspend_above: 0.97,
            release_below: 0.8,
            trend_release: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyRules {
    pub thresholds: PolicyThresholds,
    pub icu_capacity: f64,
    /// Voluntary return is possible only after this timestep
    pub voluntary_return_after: usize,
}

impl PolicyRules {
    pub fn new(icu_capacity: f64, voluntary_return_after: usize) -> Self {
        Self {
            thresholds: PolicyThresholds::default(),
            icu_capacity,
            voluntary_return_after,
        }
    }

    pub fn with_thresholds(mut self, thresholds: PolicyThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }
}

/// What a branch sees at the start of a timestep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyObservation {
    pub timestep: usize,
    /// Total ICU census on the previous day
    pub icu_census: f64,
    /// Recent mean COVID ICU census
    pub recent_trend: f64,
    /// Running peak of the 10-day COVID ICU mean
    pub peak_trend: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyState {
    pub branch: Branch,
    pub mode: PolicyMode,
    pub suspended_at: Option<usize>,
    pub recovering_at: Option<usize>,
    pub voluntary_recovery_at: Option<usize>,
}

impl PolicyState {
    pub fn new(branch: Branch) -> Self {
        Self {
            branch,
            mode: PolicyMode::Normal,
            suspended_at: None,
            recovering_at: None,
            voluntary_recovery_at: None,
        }
    }

    /// Check the trigger timestamps agree with the mode.
    pub fn validate(&self) -> Result<(), String> {
        let check = |ok: bool, what: &str| if ok { Ok(()) } else { Err(what.to_string()) };
        if self.branch == Branch::NoAction {
            check(
                !matches!(self.mode, PolicyMode::Suspended | PolicyMode::Recovering),
                "no-action branch cannot suspend electives",
            )?;
            check(
                self.suspended_at.is_none() && self.recovering_at.is_none(),
                "no-action branch recorded a suspension",
            )?;
        }
        match self.mode {
            PolicyMode::Normal => check(
                self.suspended_at.is_none()
                    && self.recovering_at.is_none()
                    && self.voluntary_recovery_at.is_none(),
                "normal mode with recorded transitions",
            ),
            PolicyMode::Suspended => check(
                self.suspended_at.is_some() && self.recovering_at.is_none(),
                "suspended without a start, or after recovering",
            ),
            PolicyMode::Recovering => match (self.suspended_at, self.recovering_at) {
                (Some(s), Some(r)) => check(s <= r, "recovery precedes suspension"),
                _ => Err("recovering without suspension and recovery timesteps".to_string()),
            },
            PolicyMode::VoluntaryRecovery => check(
                self.voluntary_recovery_at.is_some(),
                "voluntary recovery without a start",
            ),
            PolicyMode::VoluntaryReduction => check(
                self.voluntary_recovery_at.is_none(),
                "voluntary reduction after voluntary recovery began",
            ),
        }
    }
}

/// Advance a branch by one timestep.
///
/// Rules are applied in precedence order: release a suspension, suspend, keep
/// recovering, begin or continue voluntary recovery, otherwise voluntary
/// reduction. The no-action branch only applies the last two.
pub fn transition(
    state: &PolicyState,
    observation: &PolicyObservation,
    rules: &PolicyRules,
) -> PolicyState {
    let t = observation.timestep;
    let capacity = rules.icu_capacity;
    let below_release = observation.icu_census < capacity * rules.thresholds.release_below;
    let mut next = state.clone();

    if state.branch == Branch::Action {
        if state.mode == PolicyMode::Suspended
            && below_release
            && observation.recent_trend < rules.thresholds.trend_release * observation.peak_trend
        {
            next.mode = PolicyMode::Recovering;
            next.recovering_at = Some(t);
            return next;
        }

        let over_capacity = observation.icu_census > capacity * rules.thresholds.suspend_above;
        if state.mode == PolicyMode::Suspended || (over_capacity && state.recovering_at.is_none()) {
            if state.mode != PolicyMode::Suspended {
                next.suspended_at = Some(t);
            }
            next.mode = PolicyMode::Suspended;
            return next;
        }

        if state.mode == PolicyMode::Recovering {
            return next;
        }
    }

    if state.mode == PolicyMode::VoluntaryRecovery
        || (t > rules.voluntary_return_after && below_release)
    {
        if state.mode != PolicyMode::VoluntaryRecovery {
            next.voluntary_recovery_at = Some(t);
        }
        next.mode = PolicyMode::VoluntaryRecovery;
        return next;
    }

    next.mode = PolicyMode::VoluntaryReduction;
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ICU census above 97 from t = 20 to 30, then 60
    fn icu(t: usize) -> f64 {
        match t {
            0..=19 => 85.0,
            20..=30 => 98.0,
            _ => 60.0,
        }
    }

    fn mean(from: usize, to: usize) -> f64 {
        (from..to).map(icu).sum::<f64>() / (to - from) as f64
    }

    fn run(branch: Branch, until: usize) -> Vec<PolicyState> {
        let rules = PolicyRules::new(100.0, 15);
        let mut state = PolicyState::new(branch);
        let mut peak: f64 = 0.0;
        let mut states = Vec::new();
        for t in 10..=until {
            peak = peak.max(mean(t - 10, t));
            let observation = PolicyObservation {
                timestep: t,
                icu_census: icu(t - 1),
                recent_trend: mean(t - 10, t - 1),
                peak_trend: peak,
            };
            state = transition(&state, &observation, &rules);
            state.validate().unwrap();
            states.push(state.clone());
        }
        states
    }

    fn at(states: &[PolicyState], t: usize) -> &PolicyState {
        &states[t - 10]
    }

    #[test]
    fn test_suspend_then_recover() {
        let states = run(Branch::Action, 60);
        assert_eq!(at(&states, 20).mode, PolicyMode::VoluntaryReduction);
        assert_eq!(at(&states, 21).mode, PolicyMode::Suspended);
        assert_eq!(at(&states, 25).mode, PolicyMode::Suspended);
        assert_eq!(at(&states, 25).suspended_at, Some(21));
        assert_eq!(at(&states, 41).mode, PolicyMode::Recovering);
        let recovered = at(&states, 41).recovering_at.unwrap();
        assert!(recovered > 31 && recovered <= 41);
        assert!(states[recovered - 10 + 1..]
            .iter()
            .all(|s| s.mode == PolicyMode::Recovering && s.recovering_at == Some(recovered)));
    }

    #[test]
    fn test_never_suspends_again_after_recovering() {
        let rules = PolicyRules::new(100.0, 15);
        let state = PolicyState {
            branch: Branch::Action,
            mode: PolicyMode::Recovering,
            suspended_at: Some(20),
            recovering_at: Some(35),
            voluntary_recovery_at: None,
        };
        let observation = PolicyObservation {
            timestep: 50,
            icu_census: 99.0,
            recent_trend: 50.0,
            peak_trend: 50.0,
        };
        let next = transition(&state, &observation, &rules);
        assert_eq!(next, state);
    }

    #[test]
    fn test_no_action_branch_only_moves_voluntarily() {
        let states = run(Branch::NoAction, 60);
        assert!(states
            .iter()
            .all(|s| !matches!(s.mode, PolicyMode::Suspended | PolicyMode::Recovering)));
        assert_eq!(at(&states, 31).mode, PolicyMode::VoluntaryReduction);
        assert_eq!(at(&states, 32).mode, PolicyMode::VoluntaryRecovery);
        assert_eq!(at(&states, 60).voluntary_recovery_at, Some(32));
    }

    #[test]
    fn test_validate_rejects_inconsistent_timestamps() {
        let mut state = PolicyState::new(Branch::Action);
        assert!(state.validate().is_ok());
        state.mode = PolicyMode::Recovering;
        assert!(state.validate().is_err());
        state.suspended_at = Some(30);
        state.recovering_at = Some(25);
        assert!(state.validate().is_err());
        state.recovering_at = Some(31);
        assert!(state.validate().is_ok());
        state.mode = PolicyMode::Suspended;
        assert!(state.validate().is_err());

        let mut passive = PolicyState::new(Branch::NoAction);
        passive.mode = PolicyMode::Suspended;
        passive.suspended_at = Some(3);
        assert!(passive.validate().is_err());
    }
}
