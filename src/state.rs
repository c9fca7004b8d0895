use crate::cohort::CohortFilter;
use crate::config::WardConfig;
use crate::services::catalog::SourceCatalog;
use crate::services::prediction::RiskModel;
use crate::services::simulation::SimulationClock;
use axum::extract::FromRef;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: WardConfig,
    pub db: PgPool,
    pub catalog: Arc<SourceCatalog>,
    pub clock: Arc<SimulationClock>,
    pub cohort: Arc<Option<CohortFilter>>,
    pub model: Arc<dyn RiskModel>,
}

impl AppState {
    pub fn cohort_filter(&self) -> Option<&CohortFilter> {
        (*self.cohort).as_ref()
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> PgPool {
        state.db.clone()
    }
}
