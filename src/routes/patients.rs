use axum::extract::{Path, RawQuery};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use sqlx::{Postgres, QueryBuilder};

use crate::error::map_db_error;
use crate::services::catalog::FeatureSource;
use crate::services::simulation::{display_time, find_patient, CohortGate, PatientStay};
use crate::services::PatientIds;
use crate::state::AppState;

use super::features::query_param;

pub(crate) const PAGE_SIZE: i64 = 25;

const VITALS_SERIES_COLUMNS: &str = "charttime_hour, \
     heart_rate::float8 AS heart_rate, \
     sbp::float8 AS sbp, \
     dbp::float8 AS dbp, \
     mbp::float8 AS mbp, \
     resp_rate::float8 AS resp_rate, \
     temperature::float8 AS temperature, \
     spo2::float8 AS spo2, \
     glucose::float8 AS glucose";

const PROCEDURE_LOG_COLUMNS: &str = "charttime_hour, charttime, item_label, \
     value::float8 AS value, valueuom, ordercategoryname, statusdescription";

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct PatientListResponse {
    pub(crate) patients: Vec<PatientStay>,
    pub(crate) page: i64,
    pub(crate) num_pages: i64,
    pub(crate) total_patients: i64,
    pub(crate) cohort_active: bool,
    pub(crate) current_hour: i32,
    pub(crate) current_time_display: String,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct VitalsPoint {
    pub(crate) charttime_hour: NaiveDateTime,
    pub(crate) hour_label: String,
    pub(crate) heart_rate: Option<f64>,
    pub(crate) sbp: Option<f64>,
    pub(crate) dbp: Option<f64>,
    pub(crate) mbp: Option<f64>,
    pub(crate) resp_rate: Option<f64>,
    pub(crate) temperature: Option<f64>,
    pub(crate) spo2: Option<f64>,
    pub(crate) glucose: Option<f64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct VitalsPointRow {
    charttime_hour: NaiveDateTime,
    heart_rate: Option<f64>,
    sbp: Option<f64>,
    dbp: Option<f64>,
    mbp: Option<f64>,
    resp_rate: Option<f64>,
    temperature: Option<f64>,
    spo2: Option<f64>,
    glucose: Option<f64>,
}

impl From<VitalsPointRow> for VitalsPoint {
    fn from(row: VitalsPointRow) -> Self {
        Self {
            hour_label: format!("{:02}:00", row.charttime_hour.hour()),
            charttime_hour: row.charttime_hour,
            heart_rate: row.heart_rate,
            sbp: row.sbp,
            dbp: row.dbp,
            mbp: row.mbp,
            resp_rate: row.resp_rate,
            temperature: row.temperature,
            spo2: row.spo2,
            glucose: row.glucose,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct ProcedureEvent {
    pub(crate) charttime_hour: NaiveDateTime,
    pub(crate) charttime: Option<NaiveDateTime>,
    pub(crate) item_label: Option<String>,
    pub(crate) value: Option<f64>,
    pub(crate) valueuom: Option<String>,
    pub(crate) ordercategoryname: Option<String>,
    pub(crate) statusdescription: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct PatientDetailResponse {
    pub(crate) patient: PatientStay,
    pub(crate) current_hour: i32,
    pub(crate) current_time_display: String,
    pub(crate) vitals: Vec<VitalsPoint>,
    pub(crate) procedures: Vec<ProcedureEvent>,
}

pub(crate) async fn resolve_profile_table(
    state: &AppState,
) -> Result<String, (StatusCode, String)> {
    match state.catalog.resolve(&state.db, FeatureSource::Profile).await {
        Ok(Some(table)) => Ok(table),
        Ok(None) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            "No profile table found".to_string(),
        )),
        Err(err) => Err(map_db_error(err)),
    }
}

fn page_count(total: i64) -> i64 {
    if total <= 0 {
        1
    } else {
        (total + PAGE_SIZE - 1) / PAGE_SIZE
    }
}

/// Forgiving page selection: a non-numeric page falls back to the first
/// page, an out-of-range one to the last.
fn resolve_page(raw: Option<&str>, num_pages: i64) -> i64 {
    let Some(raw) = raw else {
        return 1;
    };
    match raw.trim().parse::<i64>() {
        Err(_) => 1,
        Ok(page) if page < 1 || page > num_pages => num_pages,
        Ok(page) => page,
    }
}

#[utoipa::path(
    get,
    path = "/api/patients",
    tag = "patients",
    params(("page" = Option<String>, Query, description = "1-based page number")),
    responses(
        (status = 200, description = "Admitted patients at the current hour", body = PatientListResponse),
        (status = 500, description = "No profile table found")
    )
)]
pub(crate) async fn patient_list(
    axum::extract::State(state): axum::extract::State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Json<PatientListResponse>, (StatusCode, String)> {
    let table = resolve_profile_table(&state).await?;
    let current_hour = state.clock.current_hour();
    let gate = CohortGate {
        pool: &state.db,
        table: &table,
        sim_date: state.config.sim_date,
        cohort: state.cohort_filter(),
    };

    let total = gate.admitted_count(current_hour).await.map_err(map_db_error)?;
    let num_pages = page_count(total);
    let page = resolve_page(query_param(raw.as_deref(), "page").as_deref(), num_pages);
    let patients = gate
        .admitted_page(current_hour, PAGE_SIZE, (page - 1) * PAGE_SIZE)
        .await
        .map_err(map_db_error)?;

    Ok(Json(PatientListResponse {
        patients,
        page,
        num_pages,
        total_patients: total,
        cohort_active: state.cohort_filter().is_some(),
        current_hour,
        current_time_display: display_time(state.config.sim_date, current_hour),
    }))
}

#[utoipa::path(
    get,
    path = "/api/patients/{subject_id}/{stay_id}/{hadm_id}",
    tag = "patients",
    params(
        ("subject_id" = i64, Path, description = "Subject identifier"),
        ("stay_id" = i64, Path, description = "ICU stay identifier"),
        ("hadm_id" = i64, Path, description = "Hospital admission identifier")
    ),
    responses(
        (status = 200, description = "Profile with day-so-far chart data", body = PatientDetailResponse),
        (status = 404, description = "Patient not found"),
        (status = 500, description = "No profile table found")
    )
)]
pub(crate) async fn patient_detail(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path((subject_id, stay_id, hadm_id)): Path<(i64, i64, i64)>,
) -> Result<Json<PatientDetailResponse>, (StatusCode, String)> {
    let ids = PatientIds {
        subject_id,
        stay_id,
        hadm_id,
    };
    let table = resolve_profile_table(&state).await?;
    let patient = find_patient(&state.db, &table, ids)
        .await
        .map_err(map_db_error)?
        .ok_or((StatusCode::NOT_FOUND, "Patient not found".to_string()))?;

    let current_hour = state.clock.current_hour();
    let mut vitals = Vec::new();
    let mut procedures = Vec::new();
    if current_hour >= 0 {
        vitals = vitals_series(&state, ids, current_hour).await?;
        procedures = procedure_log(&state, ids, current_hour).await?;
    }

    Ok(Json(PatientDetailResponse {
        patient,
        current_hour,
        current_time_display: display_time(state.config.sim_date, current_hour),
        vitals,
        procedures,
    }))
}

async fn vitals_series(
    state: &AppState,
    ids: PatientIds,
    hour: i32,
) -> Result<Vec<VitalsPoint>, (StatusCode, String)> {
    let table = match state
        .catalog
        .resolve(&state.db, FeatureSource::VitalsHourly)
        .await
    {
        Ok(Some(table)) => table,
        Ok(None) => {
            tracing::warn!("no vitals table resolved; chart series will be empty");
            return Ok(Vec::new());
        }
        Err(err) => return Err(map_db_error(err)),
    };
    let mut query = day_series_query(
        VITALS_SERIES_COLUMNS,
        &table,
        ids,
        state.config.sim_date,
        hour,
    );
    let rows: Vec<VitalsPointRow> = query
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(map_db_error)?;
    Ok(rows.into_iter().map(VitalsPoint::from).collect())
}

async fn procedure_log(
    state: &AppState,
    ids: PatientIds,
    hour: i32,
) -> Result<Vec<ProcedureEvent>, (StatusCode, String)> {
    let table = match state
        .catalog
        .resolve(&state.db, FeatureSource::ProceduresHourly)
        .await
    {
        Ok(Some(table)) => table,
        Ok(None) => {
            tracing::warn!("no procedures table resolved; procedure log will be empty");
            return Ok(Vec::new());
        }
        Err(err) => return Err(map_db_error(err)),
    };
    let mut query = day_series_query(
        PROCEDURE_LOG_COLUMNS,
        &table,
        ids,
        state.config.sim_date,
        hour,
    );
    query
        .build_query_as()
        .fetch_all(&state.db)
        .await
        .map_err(map_db_error)
}

fn day_series_query(
    select: &str,
    table: &str,
    ids: PatientIds,
    sim_date: NaiveDate,
    hour: i32,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {select} FROM {table} WHERE "));
    qb.push("subject_id = ");
    qb.push_bind(ids.subject_id);
    qb.push(" AND stay_id = ");
    qb.push_bind(ids.stay_id);
    qb.push(" AND EXTRACT(MONTH FROM charttime_hour)::int = ");
    qb.push_bind(sim_date.month() as i32);
    qb.push(" AND EXTRACT(DAY FROM charttime_hour)::int = ");
    qb.push_bind(sim_date.day() as i32);
    qb.push(" AND EXTRACT(HOUR FROM charttime_hour)::int <= ");
    qb.push_bind(hour);
    qb.push(" ORDER BY charttime_hour");
    qb
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", get(patient_list))
        .route(
            "/patients/{subject_id}/{stay_id}/{hadm_id}",
            get(patient_detail),
        )
}
