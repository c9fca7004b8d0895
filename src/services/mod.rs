pub mod catalog;
pub mod features;
pub mod fetch;
pub mod prediction;
pub mod simulation;
pub mod wide;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Composite key identifying one ICU stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PatientIds {
    pub subject_id: i64,
    pub stay_id: i64,
    pub hadm_id: i64,
}

/// Inclusive time window over `charttime_hour`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}
