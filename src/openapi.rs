use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ward-server-rs",
        description = "Simulated ICU ward: hourly replay of one admission day with per-source feature extraction"
    ),
    paths(
        crate::routes::health::healthz_handler,
        crate::routes::patients::patient_list,
        crate::routes::patients::patient_detail,
        crate::routes::simulation::advance_simulation,
        crate::routes::features::static_features,
        crate::routes::features::hourly_features,
        crate::routes::features::hourly_wide_features,
        crate::routes::features::feature_bundle,
        crate::routes::prediction::predict_risk,
    ),
    components(schemas(
        crate::routes::health::HealthResponse,
        crate::routes::health::DatabaseHealth,
        crate::routes::patients::PatientListResponse,
        crate::routes::patients::PatientDetailResponse,
        crate::routes::patients::VitalsPoint,
        crate::routes::patients::ProcedureEvent,
        crate::routes::simulation::AdvanceResponse,
        crate::routes::simulation::SaturationResponse,
        crate::routes::features::StaticFeaturesResponse,
        crate::routes::features::WindowedFeaturesResponse,
        crate::routes::prediction::PredictionResponse,
        crate::routes::prediction::PredictionErrorResponse,
        crate::services::prediction::ComorbidityGroup,
        crate::services::fetch::SourceResult,
        crate::services::simulation::PatientStay,
        crate::services::PatientIds,
        crate::services::TimeWindow,
        crate::json::RowMap,
    )),
    tags(
        (name = "patients", description = "Admitted patients and chart detail"),
        (name = "simulation", description = "Ward clock control"),
        (name = "features", description = "Per-source feature extraction"),
        (name = "prediction", description = "Risk scoring")
    )
)]
pub struct ApiDoc;

pub(crate) async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}
