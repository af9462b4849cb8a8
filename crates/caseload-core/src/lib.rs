//! Shared data model for hospital non-COVID caseload forecasting.

pub mod autoregressive;
pub mod category;
pub mod census;
pub mod engine;
pub mod error;
pub mod logistic;
pub mod period;
pub mod series;
pub mod signal;
pub mod stats;

pub use autoregressive::ArModel;
pub use category::{AdmissionRoute, Category, CategoryMap, Mdc, ProcedureType};
pub use census::{aggregate_region, CensusMetric, DropoutRule, FacilityCensus, RegionalCensus};
pub use engine::SimulationEngine;
pub use error::CoreError;
pub use logistic::{LogisticCurve, ResponseCurve};
pub use period::{DateWindow, PeriodIndices, PeriodSchedule, PeriodWindow, Regime};
pub use series::{seasonal_slot, DailySeries, SEASONAL_SLOTS};
pub use signal::{CategoryTable, Signal, SignalTable};
