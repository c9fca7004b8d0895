use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Datelike;

use crate::error::map_db_error;
use crate::json::RowMap;
use crate::services::catalog::FeatureSource;
use crate::services::fetch::{self, FetchRequest, Predicate, HOURLY_ROW_LIMIT};
use crate::services::simulation::{display_time, ClockTick, CohortGate, PatientStay, TERMINAL_HOUR};
use crate::state::AppState;

use super::patients::resolve_profile_table;

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct AdvanceResponse {
    pub(crate) current_hour: i32,
    pub(crate) current_time: String,
    pub(crate) new_patients: Vec<PatientStay>,
    pub(crate) new_patients_count: usize,
    pub(crate) total_admitted: i64,
    pub(crate) vitalsigns: Vec<RowMap>,
    pub(crate) vitalsigns_count: usize,
    pub(crate) procedureevents: Vec<RowMap>,
    pub(crate) procedureevents_count: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
pub(crate) struct SaturationResponse {
    pub(crate) error: String,
    pub(crate) current_hour: i32,
    pub(crate) current_time: String,
}

#[utoipa::path(
    post,
    path = "/api/simulation/advance",
    tag = "simulation",
    responses(
        (status = 200, description = "Clock advanced; arrivals and hour data for the new hour", body = AdvanceResponse),
        (status = 400, description = "Simulated day already complete", body = SaturationResponse),
        (status = 500, description = "No profile table found")
    )
)]
pub(crate) async fn advance_simulation(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<AdvanceResponse>, Response> {
    let hour = match state.clock.advance() {
        ClockTick::Saturated => {
            let body = SaturationResponse {
                error: format!("Cannot advance past {TERMINAL_HOUR}:00"),
                current_hour: TERMINAL_HOUR,
                current_time: display_time(state.config.sim_date, TERMINAL_HOUR),
            };
            return Err((StatusCode::BAD_REQUEST, Json(body)).into_response());
        }
        ClockTick::Advanced(hour) => hour,
    };

    let table = resolve_profile_table(&state)
        .await
        .map_err(IntoResponse::into_response)?;
    let gate = CohortGate {
        pool: &state.db,
        table: &table,
        sim_date: state.config.sim_date,
        cohort: state.cohort_filter(),
    };

    let new_patients = gate.new_arrivals(hour).await.map_err(db_error)?;
    let stay_ids = gate.admitted_stay_ids(hour).await.map_err(db_error)?;
    let total_admitted = stay_ids.len() as i64;

    let (vitalsigns, procedureevents) = if stay_ids.is_empty() {
        (Vec::new(), Vec::new())
    } else {
        (
            hour_rows(&state, FeatureSource::VitalsHourly, &stay_ids, hour).await,
            hour_rows(&state, FeatureSource::ProceduresHourly, &stay_ids, hour).await,
        )
    };

    Ok(Json(AdvanceResponse {
        current_hour: hour,
        current_time: display_time(state.config.sim_date, hour),
        new_patients_count: new_patients.len(),
        new_patients,
        total_admitted,
        vitalsigns_count: vitalsigns.len(),
        vitalsigns,
        procedureevents_count: procedureevents.len(),
        procedureevents,
    }))
}

/// Rows for the exact new hour across the admitted stays. Missing or failing
/// sources degrade to an empty list so the tick still completes.
async fn hour_rows(
    state: &AppState,
    source: FeatureSource,
    stay_ids: &[i64],
    hour: i32,
) -> Vec<RowMap> {
    let table = match state.catalog.resolve(&state.db, source).await {
        Ok(Some(table)) => table,
        Ok(None) => {
            tracing::warn!(source = source.key(), "no table resolved for hourly update");
            return Vec::new();
        }
        Err(err) => {
            tracing::warn!(source = source.key(), error = %err, "table resolution failed");
            return Vec::new();
        }
    };
    let request = FetchRequest {
        table,
        predicates: vec![
            ("stay_id".to_string(), Predicate::AnyInt(stay_ids.to_vec())),
            (
                "charttime_hour".to_string(),
                Predicate::DayHourEq {
                    month: state.config.sim_date.month(),
                    day: state.config.sim_date.day(),
                    hour,
                },
            ),
        ],
        order_by: None,
        limit: HOURLY_ROW_LIMIT,
    };
    fetch::fetch_rows(&state.db, &request).await.rows
}

fn db_error(err: sqlx::Error) -> Response {
    map_db_error(err).into_response()
}

pub fn router() -> Router<AppState> {
    Router::new().route("/simulation/advance", post(advance_simulation))
}
