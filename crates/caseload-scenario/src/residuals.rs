//! Autoregressive residuals with quantile-binned innovations
//!
//! The fitted-versus-observed error of each synthetic signal is modelled as an
//! AR process. Innovations are resampled from the in-sample residuals whose AR
//! prediction fell in the same quantile bin as the current prediction, keeping
//! the noise level state dependent.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use caseload_core::{stats, ArModel};

use crate::error::SimulationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResidualConfig {
    pub order: usize,
    pub bins: usize,
    /// Days before the simulation start bounding the admissions and case-weight fit
    pub volume_window: (usize, usize),
    /// Days before the simulation start bounding the ICU fit
    pub icu_window: (usize, usize),
}

impl Default for ResidualConfig {
    fn default() -> Self {
        Self {
            order: 2,
            bins: 5,
            volume_window: (180, 30),
            icu_window: (110, 70),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinnedResiduals {
    model: ArModel,
    edges: Vec<f64>,
    pools: Vec<Vec<f64>>,
}

impl BinnedResiduals {
    pub fn fit(errors: &[f64], order: usize, bins: usize) -> Result<Self, SimulationError> {
        let model = ArModel::fit(order, errors)?;
        let fitted = &model.fitted()[order..];
        let residuals = &model.residuals()[order..];

        let bins = bins.max(1);
        let edges = stats::quantile_edges(fitted, bins);
        let mut pools = vec![Vec::new(); bins];
        for (prediction, residual) in fitted.iter().zip(residuals) {
            pools[stats::bin_index(*prediction, &edges)].push(*residual);
        }

        let empty: Vec<usize> = (0..bins).filter(|b| pools[*b].is_empty()).collect();
        if !empty.is_empty() {
            warn!(?empty, "empty residual bins, sampling from nearest non-empty bin");
        }
        Ok(Self {
            model,
            edges,
            pools,
        })
    }

    pub fn model(&self) -> &ArModel {
        &self.model
    }

    pub fn pool(&self, bin: usize) -> &[f64] {
        &self.pools[bin]
    }

    /// Bin holding `prediction`, or the closest non-empty one
    pub fn bin_for(&self, prediction: f64) -> Option<usize> {
        let home = stats::bin_index(prediction, &self.edges);
        (0..self.pools.len())
            .flat_map(|distance| [home.checked_sub(distance), Some(home + distance)])
            .flatten()
            .find(|b| self.pools.get(*b).is_some_and(|p| !p.is_empty()))
    }

    pub fn draw<R: Rng>(&self, prediction: f64, rng: &mut R) -> f64 {
        match self.bin_for(prediction) {
            Some(bin) => {
                let pool = &self.pools[bin];
                pool[rng.gen_range(0..pool.len())]
            }
            None => 0.0,
        }
    }

    /// Overwrite `series[from..]` with the AR recursion plus drawn innovations.
    pub fn extend<R: Rng>(&self, series: &mut [f64], from: usize, rng: &mut R) {
        for x in from.max(self.model.order())..series.len() {
            let prediction = self.model.predict(&series[..x]);
            series[x] = prediction + self.draw(prediction, rng);
        }
    }
}
