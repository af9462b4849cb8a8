//! Realization ensembles and their percentile reduction

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use caseload_core::stats;

use crate::projector::Realization;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Compartment {
    #[serde(rename = "s")]
    Susceptible,
    #[serde(rename = "e")]
    Exposed,
    #[serde(rename = "i")]
    Infectious,
    #[serde(rename = "r_eff")]
    Reproduction,
    #[serde(rename = "h")]
    Hospitalizations,
    #[serde(rename = "ma_reff")]
    SmoothedReproduction,
}

impl Compartment {
    pub const ALL: [Compartment; 6] = [
        Compartment::Susceptible,
        Compartment::Exposed,
        Compartment::Infectious,
        Compartment::Reproduction,
        Compartment::Hospitalizations,
        Compartment::SmoothedReproduction,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Compartment::Susceptible => "s",
            Compartment::Exposed => "e",
            Compartment::Infectious => "i",
            Compartment::Reproduction => "r_eff",
            Compartment::Hospitalizations => "h",
            Compartment::SmoothedReproduction => "ma_reff",
        }
    }
}

impl fmt::Display for Compartment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Realization {
    pub fn series(&self, compartment: Compartment) -> &[f64] {
        match compartment {
            Compartment::Susceptible => &self.susceptible,
            Compartment::Exposed => &self.exposed,
            Compartment::Infectious => &self.infectious,
            Compartment::Reproduction => &self.reproduction,
            Compartment::Hospitalizations => &self.hospitalizations,
            Compartment::SmoothedReproduction => &self.smoothed_reproduction,
        }
    }
}

/// All realizations of one transmission scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpidemicEnsemble {
    realizations: Vec<Realization>,
}

impl EpidemicEnsemble {
    pub fn new(realizations: Vec<Realization>) -> Self {
        Self { realizations }
    }

    pub fn realizations(&self) -> &[Realization] {
        &self.realizations
    }

    pub fn horizon(&self) -> usize {
        self.realizations
            .first()
            .map(|r| r.hospitalizations.len())
            .unwrap_or(0)
    }

    /// Values of `compartment` across realizations on `day`
    pub fn cross_section(&self, compartment: Compartment, day: usize) -> Vec<f64> {
        self.realizations
            .iter()
            .filter_map(|r| r.series(compartment).get(day).copied())
            .collect()
    }

    /// Reduce to `gradations + 1` percentile levels per compartment and day.
    pub fn percentiles(&self, gradations: usize) -> PercentileEnsemble {
        let horizon = self.horizon();
        let mut levels = BTreeMap::new();
        for compartment in Compartment::ALL {
            let mut by_level: BTreeMap<String, Vec<f64>> = (0..=gradations)
                .map(|z| (z.to_string(), Vec::with_capacity(horizon)))
                .collect();
            for day in 0..horizon {
                let reduced = stats::percentile_levels(&self.cross_section(compartment, day), gradations);
                for (z, value) in reduced.into_iter().enumerate() {
                    if let Some(series) = by_level.get_mut(&z.to_string()) {
                        series.push(value);
                    }
                }
            }
            levels.insert(compartment, by_level);
        }
        PercentileEnsemble { gradations, levels }
    }
}

/// Percentile levels `"0"..="gradations"` per compartment; level `gradations`
/// is the ensemble maximum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileEnsemble {
    pub gradations: usize,
    pub levels: BTreeMap<Compartment, BTreeMap<String, Vec<f64>>>,
}

impl PercentileEnsemble {
    pub fn level(&self, compartment: Compartment, z: usize) -> Option<&[f64]> {
        self.levels
            .get(&compartment)?
            .get(&z.to_string())
            .map(Vec::as_slice)
    }

    pub fn horizon(&self) -> usize {
        self.level(Compartment::Hospitalizations, 0)
            .map(<[f64]>::len)
            .unwrap_or(0)
    }
}
