use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Optional restriction of the simulation to a fixed patient cohort, loaded
/// once at startup. Either a bare subject-id list or exact
/// (subject_id, stay_id, hadm_id) tuples.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CohortFilter {
    SubjectIds { values: Vec<i64> },
    Tuples { values: Vec<(i64, i64, i64)> },
}

pub fn load_cohort_filter(path: Option<&Path>) -> Result<Option<CohortFilter>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read cohort file {}", path.display()))?;
    let filter: CohortFilter = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse cohort file {}", path.display()))?;
    Ok(Some(filter))
}
