//! Equipment census from daily admissions
//!
//! Every admitted cohort occupies each equipment tier with an empirical
//! probability that depends on days since admission. Summing those
//! contributions over admission days gives the census on each tier.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SimulationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentTier {
    RoomAir,
    Oxygen,
    Icu,
    Ventilator,
}

impl EquipmentTier {
    pub const ALL: [EquipmentTier; 4] = [
        EquipmentTier::RoomAir,
        EquipmentTier::Oxygen,
        EquipmentTier::Icu,
        EquipmentTier::Ventilator,
    ];
}

impl fmt::Display for EquipmentTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EquipmentTier::RoomAir => write!(f, "room_air"),
            EquipmentTier::Oxygen => write!(f, "oxygen"),
            EquipmentTier::Icu => write!(f, "icu"),
            EquipmentTier::Ventilator => write!(f, "ventilator"),
        }
    }
}

/// Probability that a patient admitted `n` days ago is on a tier, for one cohort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageCohort {
    pub label: String,
    pub probabilities: Vec<f64>,
}

/// Cohort curves per tier for one probability set
pub type TierCurves = BTreeMap<EquipmentTier, Vec<UsageCohort>>;

/// Usage curves keyed by probability set name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageTable {
    pub sets: BTreeMap<String, TierCurves>,
}

impl UsageTable {
    pub fn curves(&self, set: &str) -> Result<&TierCurves, SimulationError> {
        self.sets
            .get(set)
            .ok_or_else(|| SimulationError::MissingUsageCurves {
                set: set.to_string(),
                tier: "any".to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OxygenConfig {
    pub probability_set: String,
    pub lookahead: usize,
    /// Initial position of the cohort rotation
    pub start_offset: usize,
}

impl Default for OxygenConfig {
    fn default() -> Self {
        Self {
            probability_set: "low".to_string(),
            lookahead: 90,
            start_offset: 0,
        }
    }
}

/// Ward, ICU and ventilator census, each `admissions.len() + lookahead` long
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentCensus {
    /// Room air plus supplemental oxygen
    pub ward: Vec<f64>,
    pub icu: Vec<f64>,
    pub ventilator: Vec<f64>,
}

pub struct OxygenTranslator<'a> {
    curves: &'a TierCurves,
    lookahead: usize,
    start_offset: usize,
}

impl<'a> OxygenTranslator<'a> {
    /// Check every tier has at least one cohort covering the lookahead.
    pub fn new(table: &'a UsageTable, config: &OxygenConfig) -> Result<Self, SimulationError> {
        let curves = table.curves(&config.probability_set)?;
        for tier in EquipmentTier::ALL {
            let cohorts = curves
                .get(&tier)
                .filter(|c| !c.is_empty())
                .ok_or_else(|| SimulationError::MissingUsageCurves {
                    set: config.probability_set.clone(),
                    tier: tier.to_string(),
                })?;
            for cohort in cohorts {
                if cohort.probabilities.len() < config.lookahead {
                    return Err(caseload_core::CoreError::LengthMismatch {
                        what: format!("{} usage cohort '{}'", tier, cohort.label),
                        expected: config.lookahead,
                        actual: cohort.probabilities.len(),
                    }
                    .into());
                }
            }
        }
        Ok(Self {
            curves,
            lookahead: config.lookahead,
            start_offset: config.start_offset,
        })
    }

    pub fn translate(&self, admissions: &[f64]) -> EquipmentCensus {
        let len = admissions.len() + self.lookahead;
        let mut census: BTreeMap<EquipmentTier, Vec<f64>> = EquipmentTier::ALL
            .iter()
            .map(|tier| (*tier, vec![0.0; len]))
            .collect();

        let mut rotation = self.start_offset;
        for (day, admitted) in admissions.iter().enumerate() {
            for tier in EquipmentTier::ALL {
                let (Some(cohorts), Some(totals)) = (self.curves.get(&tier), census.get_mut(&tier))
                else {
                    continue;
                };
                let cohort = &cohorts[rotation % cohorts.len()];
                rotation += 1;
                for (ahead, p) in cohort.probabilities[..self.lookahead].iter().enumerate() {
                    totals[day + ahead] += p * admitted;
                }
            }
        }
        debug!(days = admissions.len(), lookahead = self.lookahead, "translated equipment census");

        let mut take = |tier: EquipmentTier| census.remove(&tier).unwrap_or_else(|| vec![0.0; len]);
        let room_air = take(EquipmentTier::RoomAir);
        let oxygen = take(EquipmentTier::Oxygen);
        EquipmentCensus {
            ward: room_air.iter().zip(&oxygen).map(|(a, b)| a + b).collect(),
            icu: take(EquipmentTier::Icu),
            ventilator: take(EquipmentTier::Ventilator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn table(lookahead: usize) -> UsageTable {
        let cohort = |label: &str, p: f64| UsageCohort {
            label: label.to_string(),
            probabilities: (0..lookahead).map(|n| p / (1.0 + n as f64)).collect(),
        };
        let mut curves = TierCurves::new();
        curves.insert(EquipmentTier::RoomAir, vec![cohort("a", 0.5), cohort("b", 0.4)]);
        curves.insert(EquipmentTier::Oxygen, vec![cohort("a", 0.3), cohort("b", 0.2)]);
        curves.insert(EquipmentTier::Icu, vec![cohort("a", 0.2), cohort("b", 0.1)]);
        curves.insert(EquipmentTier::Ventilator, vec![cohort("a", 0.1), cohort("b", 0.05)]);
        let mut sets = BTreeMap::new();
        sets.insert("low".to_string(), curves);
        UsageTable { sets }
    }

    #[test]
    fn test_zero_admissions_give_zero_census() {
        let usage = table(20);
        let config = OxygenConfig {
            lookahead: 20,
            ..OxygenConfig::default()
        };
        let translator = OxygenTranslator::new(&usage, &config).unwrap();
        let census = translator.translate(&[0.0; 50]);
        assert_eq!(census.ward.len(), 70);
        assert_eq!(census.icu.len(), 70);
        assert_eq!(census.ventilator.len(), 70);
        assert!(census.ward.iter().all(|v| *v == 0.0));
        assert!(census.icu.iter().all(|v| *v == 0.0));
        assert!(census.ventilator.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_cohorts_rotate_across_tiers() {
        let usage = table(5);
        let config = OxygenConfig {
            lookahead: 5,
            ..OxygenConfig::default()
        };
        let census = OxygenTranslator::new(&usage, &config)
            .unwrap()
            .translate(&[10.0, 0.0]);
        // Day 0 picks cohorts a, b, a, b for the four tiers in order.
        assert_relative_eq!(census.ward[0], 7.0, epsilon = 1e-12);
        assert_relative_eq!(census.icu[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(census.ventilator[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(census.icu[2], 2.0 / 3.0, epsilon = 1e-12);
        assert_eq!(census.icu[6], 0.0);

        let shifted = OxygenTranslator::new(
            &usage,
            &OxygenConfig {
                start_offset: 1,
                ..config
            },
        )
        .unwrap()
        .translate(&[10.0, 0.0]);
        assert_relative_eq!(shifted.icu[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_short_curves_are_rejected() {
        let usage = table(5);
        let err = OxygenTranslator::new(&usage, &OxygenConfig::default()).err().unwrap();
        assert!(matches!(err, SimulationError::Core(_)));
        let err = OxygenTranslator::new(
            &usage,
            &OxygenConfig {
                probability_set: "high".to_string(),
                ..OxygenConfig::default()
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, SimulationError::MissingUsageCurves { .. }));
    }
}
