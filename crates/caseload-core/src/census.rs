//! Facility census cleaning and regional aggregation

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;
use crate::series::DailySeries;

/// Daily hospital capacity report fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CensusMetric {
    Admissions,
    CovidCensus,
    TotalCensus,
    TotalCapacity,
    CovidIcuCensus,
    TotalIcuCensus,
    IcuCapacity,
    VentilatorCensus,
    VentilatorCapacity,
    SurgeCapacity,
}

impl CensusMetric {
    pub const ALL: [CensusMetric; 10] = [
        CensusMetric::Admissions,
        CensusMetric::CovidCensus,
        CensusMetric::TotalCensus,
        CensusMetric::TotalCapacity,
        CensusMetric::CovidIcuCensus,
        CensusMetric::TotalIcuCensus,
        CensusMetric::IcuCapacity,
        CensusMetric::VentilatorCensus,
        CensusMetric::VentilatorCapacity,
        CensusMetric::SurgeCapacity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CensusMetric::Admissions => "admissions",
            CensusMetric::CovidCensus => "covid_census",
            CensusMetric::TotalCensus => "total_census",
            CensusMetric::TotalCapacity => "total_capacity",
            CensusMetric::CovidIcuCensus => "covid_icu_census",
            CensusMetric::TotalIcuCensus => "total_icu_census",
            CensusMetric::IcuCapacity => "icu_capacity",
            CensusMetric::VentilatorCensus => "ventilator_census",
            CensusMetric::VentilatorCapacity => "ventilator_capacity",
            CensusMetric::SurgeCapacity => "surge_capacity",
        }
    }

    /// Census/capacity metrics are subject to dropout smoothing; admissions are not
    fn is_smoothed(&self) -> bool {
        !matches!(self, CensusMetric::Admissions)
    }
}

impl fmt::Display for CensusMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One facility's daily report, starting at `origin`. Missing metrics are treated
/// as all-zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilityCensus {
    pub name: String,
    pub origin: NaiveDate,
    pub metrics: BTreeMap<CensusMetric, Vec<f64>>,
}

impl FacilityCensus {
    fn len(&self) -> usize {
        self.metrics.values().map(Vec::len).max().unwrap_or(0)
    }
}

/// Parameters of the dropout smoothing rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DropoutRule {
    /// A day is a suspected dropout when it falls below this fraction of the previous day
    pub drop_fraction: f64,
    /// The dropout is confirmed when a later day rebounds above this fraction
    pub rebound_fraction: f64,
    /// Days searched for the rebound
    pub lookahead_days: usize,
}

impl Default for DropoutRule {
    fn default() -> Self {
        Self {
            drop_fraction: 0.5,
            rebound_fraction: 0.8,
            lookahead_days: 14,
        }
    }
}

impl DropoutRule {
    /// Replace reporting dropouts with the previous day's value.
    ///
    /// Near the end of the series, where the lookahead window does not fit, every
    /// suspected dropout is treated as a reporting error.
    pub fn apply(&self, values: &mut [f64], from: usize) {
        let len = values.len();
        for day in from.max(1)..len {
            let previous = values[day - 1];
            if values[day] >= self.drop_fraction * previous {
                continue;
            }
            let rebounds = if day + self.lookahead_days < len {
                (1..self.lookahead_days)
                    .any(|ahead| values[day + ahead] > self.rebound_fraction * previous)
            } else {
                true
            };
            if rebounds {
                values[day] = previous;
            }
        }
    }
}

/// Region-wide daily totals aligned to a shared origin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionalCensus {
    pub name: String,
    pub origin: NaiveDate,
    pub metrics: BTreeMap<CensusMetric, DailySeries>,
}

impl RegionalCensus {
    pub fn series(&self, metric: CensusMetric) -> Result<&DailySeries, CoreError> {
        self.metrics.get(&metric).ok_or_else(|| CoreError::MissingMetric {
            region: self.name.clone(),
            metric: metric.to_string(),
        })
    }

    pub fn values(&self, metric: CensusMetric) -> Result<&[f64], CoreError> {
        Ok(self.series(metric)?.values())
    }

    pub fn len(&self) -> usize {
        self.metrics.values().map(DailySeries::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last reported value of a metric
    pub fn final_value(&self, metric: CensusMetric) -> Result<f64, CoreError> {
        self.values(metric)?
            .last()
            .copied()
            .ok_or_else(|| CoreError::EmptyRegion(self.name.clone()))
    }

    /// Ratio of this region's final staffed capacity to `other`'s
    pub fn capacity_ratio(&self, other: &RegionalCensus) -> Result<f64, CoreError> {
        let denominator = other.final_value(CensusMetric::TotalCapacity)?;
        if denominator <= 0.0 {
            return Err(CoreError::ZeroDenominator(format!(
                "capacity ratio {} / {}",
                self.name, other.name
            )));
        }
        Ok(self.final_value(CensusMetric::TotalCapacity)? / denominator)
    }
}

/// Clean each facility's report and sum facilities into regional totals.
///
/// Only days on or after `origin` contribute. Census values are rescaled to the
/// facility's final staffed capacity so capacity changes over the year do not
/// show up as occupancy swings, and the regional surge figure is reported as surge
/// beds plus staffed capacity.
pub fn aggregate_region(
    name: &str,
    facilities: &[FacilityCensus],
    origin: NaiveDate,
    rule: &DropoutRule,
) -> Result<RegionalCensus, CoreError> {
    if facilities.is_empty() {
        return Err(CoreError::EmptyRegion(name.to_string()));
    }

    let region_len = facilities
        .iter()
        .map(|f| {
            let end = f.origin + Duration::days(f.len() as i64);
            (end - origin).num_days().max(0) as usize
        })
        .max()
        .unwrap_or(0);

    let mut totals: BTreeMap<CensusMetric, Vec<f64>> = CensusMetric::ALL
        .iter()
        .map(|m| (*m, vec![0.0; region_len]))
        .collect();

    for facility in facilities {
        let cleaned = clean_facility(facility, origin, rule);
        let offset = (facility.origin - origin).num_days();
        debug!(facility = %facility.name, offset, "aggregating facility census");

        for (metric, values) in &cleaned {
            for (day, value) in values.iter().enumerate() {
                let regional_day = offset + day as i64;
                if regional_day < 0 || regional_day as usize >= region_len {
                    continue;
                }
                let contribution = if *metric == CensusMetric::SurgeCapacity {
                    value + cleaned[&CensusMetric::TotalCapacity][day]
                } else {
                    *value
                };
                if let Some(total) = totals.get_mut(metric) {
                    total[regional_day as usize] += contribution;
                }
            }
        }
    }

    Ok(RegionalCensus {
        name: name.to_string(),
        origin,
        metrics: totals
            .into_iter()
            .map(|(metric, values)| (metric, DailySeries::new(origin, values)))
            .collect(),
    })
}

fn clean_facility(
    facility: &FacilityCensus,
    origin: NaiveDate,
    rule: &DropoutRule,
) -> BTreeMap<CensusMetric, Vec<f64>> {
    let len = facility.len();
    let mut metrics: BTreeMap<CensusMetric, Vec<f64>> = CensusMetric::ALL
        .iter()
        .map(|m| {
            let mut values = facility.metrics.get(m).cloned().unwrap_or_default();
            values.resize(len, 0.0);
            (*m, values)
        })
        .collect();

    let first = (origin - facility.origin).num_days().max(0) as usize;

    for (metric, values) in metrics.iter_mut() {
        if metric.is_smoothed() {
            rule.apply(values, first);
        }
    }

    for (census, capacity) in [
        (CensusMetric::TotalCensus, CensusMetric::TotalCapacity),
        (CensusMetric::TotalIcuCensus, CensusMetric::IcuCapacity),
    ] {
        let capacities = metrics[&capacity].clone();
        let final_capacity = capacities.last().copied().unwrap_or(0.0);
        let mut rescaled_capacity = capacities.clone();
        if let Some(values) = metrics.get_mut(&census) {
            for day in first..len {
                if capacities[day] > 0.0 {
                    values[day] *= final_capacity / capacities[day];
                    rescaled_capacity[day] = final_capacity;
                }
            }
        }
        metrics.insert(capacity, rescaled_capacity);
    }

    if let Some(surge) = metrics.get_mut(&CensusMetric::SurgeCapacity) {
        let final_surge = surge.last().copied().unwrap_or(0.0);
        for value in surge.iter_mut().skip(first) {
            if *value > 0.0 {
                *value = final_surge;
            }
        }
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_dropout_with_rebound_is_smoothed() {
        let mut values = vec![20.0; 40];
        values[5] = 0.0;
        DropoutRule::default().apply(&mut values, 0);
        assert_eq!(values[5], 20.0);
    }

    #[test]
    fn test_sustained_drop_is_kept() {
        let mut values = vec![20.0; 40];
        for v in values.iter_mut().skip(10) {
            *v = 5.0;
        }
        DropoutRule::default().apply(&mut values, 0);
        assert_eq!(values[10], 5.0);
        assert_eq!(values[20], 5.0);
    }

    #[test]
    fn test_drop_near_end_is_treated_as_error() {
        let mut values = vec![20.0; 20];
        values[18] = 1.0;
        values[19] = 1.0;
        DropoutRule::default().apply(&mut values, 0);
        assert_eq!(values[18], 20.0);
        assert_eq!(values[19], 20.0);
    }

    fn facility(name: &str, origin: NaiveDate, len: usize, icu: f64, icu_capacity: f64) -> FacilityCensus {
        let mut metrics = BTreeMap::new();
        metrics.insert(CensusMetric::Admissions, vec![3.0; len]);
        metrics.insert(CensusMetric::TotalIcuCensus, vec![icu; len]);
        metrics.insert(CensusMetric::IcuCapacity, vec![icu_capacity; len]);
        metrics.insert(CensusMetric::TotalCapacity, vec![100.0; len]);
        metrics.insert(CensusMetric::SurgeCapacity, vec![10.0; len]);
        FacilityCensus {
            name: name.to_string(),
            origin,
            metrics,
        }
    }

    #[test]
    fn test_aggregate_region_sums_facilities() {
        let origin = date(2020, 3, 1);
        let facilities = vec![
            facility("a", origin, 30, 8.0, 10.0),
            facility("b", date(2020, 2, 20), 40, 4.0, 5.0),
        ];
        let region = aggregate_region("test", &facilities, origin, &DropoutRule::default()).unwrap();
        assert_eq!(region.len(), 30);
        let admissions = region.values(CensusMetric::Admissions).unwrap();
        assert_relative_eq!(admissions[0], 6.0);
        assert_relative_eq!(region.values(CensusMetric::TotalIcuCensus).unwrap()[3], 12.0);
        assert_relative_eq!(region.final_value(CensusMetric::IcuCapacity).unwrap(), 15.0);
        assert_relative_eq!(region.values(CensusMetric::SurgeCapacity).unwrap()[0], 220.0);
    }

    #[test]
    fn test_census_rescaled_to_final_capacity() {
        let origin = date(2020, 3, 1);
        let mut f = facility("a", origin, 10, 5.0, 10.0);
        if let Some(capacity) = f.metrics.get_mut(&CensusMetric::IcuCapacity) {
            capacity[9] = 20.0;
        }
        // the capacity jump would itself look like a 2x rise, not a dropout
        let region = aggregate_region("test", &[f], origin, &DropoutRule::default()).unwrap();
        assert_relative_eq!(region.values(CensusMetric::TotalIcuCensus).unwrap()[0], 10.0);
        assert_relative_eq!(region.values(CensusMetric::IcuCapacity).unwrap()[0], 20.0);
    }

    #[test]
    fn test_capacity_ratio_requires_capacity() {
        let origin = date(2020, 3, 1);
        let region = aggregate_region("a", &[facility("a", origin, 5, 1.0, 1.0)], origin, &DropoutRule::default()).unwrap();
        let mut empty = region.clone();
        empty.metrics.insert(CensusMetric::TotalCapacity, DailySeries::zeros(origin, 5));
        assert_relative_eq!(region.capacity_ratio(&region).unwrap(), 1.0);
        assert!(region.capacity_ratio(&empty).is_err());
    }
}
