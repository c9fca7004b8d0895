use crate::config::WardConfig;
use crate::db;
use crate::services::catalog::SourceCatalog;
use crate::services::prediction::StubRiskModel;
use crate::services::simulation::SimulationClock;
use crate::state::AppState;
use chrono::NaiveDate;
use std::sync::Arc;

pub fn test_config() -> WardConfig {
    WardConfig {
        database_url: "postgresql://postgres@localhost/postgres".to_string(),
        sim_date: NaiveDate::from_ymd_opt(2025, 3, 13).expect("valid date"),
        cohort_path: None,
    }
}

/// State over a lazy pool that never connects. Handler tests exercise the
/// request-validation paths that return before touching the store.
pub fn test_state() -> AppState {
    let config = test_config();
    let pool = db::connect_lazy(&config.database_url).expect("connect_lazy");
    AppState {
        config,
        db: pool,
        catalog: Arc::new(SourceCatalog::from_env()),
        clock: Arc::new(SimulationClock::new()),
        cohort: Arc::new(None),
        model: Arc::new(StubRiskModel),
    }
}
