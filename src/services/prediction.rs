use chrono::NaiveDateTime;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::PatientIds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ComorbidityGroup {
    Cardiovascular,
    Renal,
    Respiratory,
    Hepatic,
    Hematologic,
    Other,
}

pub const COMORBIDITY_GROUPS: [ComorbidityGroup; 6] = [
    ComorbidityGroup::Cardiovascular,
    ComorbidityGroup::Renal,
    ComorbidityGroup::Respiratory,
    ComorbidityGroup::Hepatic,
    ComorbidityGroup::Hematologic,
    ComorbidityGroup::Other,
];

#[derive(Debug, Clone, Copy)]
pub struct PredictionInput {
    pub ids: PatientIds,
    pub as_of: NaiveDateTime,
    pub window_hours: i64,
}

#[derive(Debug, Clone, Copy, Serialize, utoipa::ToSchema)]
pub struct Prediction {
    /// Risk score in [0, 1].
    pub risk_score: f64,
    pub comorbidity_group: ComorbidityGroup,
}

/// Scoring seam. Implementations must be pure functions of their input:
/// identical inputs yield identical outputs. A real model replaces the
/// stub behind this trait without touching the interface.
pub trait RiskModel: Send + Sync {
    fn predict(&self, input: &PredictionInput) -> anyhow::Result<Prediction>;
}

/// Deterministic placeholder until the model service exists: hashes the
/// patient identity and as-of time, derives a score bucket and a group
/// from the digest.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubRiskModel;

impl RiskModel for StubRiskModel {
    fn predict(&self, input: &PredictionInput) -> anyhow::Result<Prediction> {
        let key = format!(
            "{}_{}_{}_{}",
            input.ids.subject_id, input.ids.stay_id, input.ids.hadm_id, input.as_of
        );
        let digest = Sha256::digest(key.as_bytes());
        let h = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);

        Ok(Prediction {
            risk_score: f64::from(h % 100) / 100.0,
            comorbidity_group: COMORBIDITY_GROUPS[(h % 6) as usize],
        })
    }
}
