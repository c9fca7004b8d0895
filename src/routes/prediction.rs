use axum::extract::{Path, RawQuery};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::services::prediction::{ComorbidityGroup, PredictionInput};
use crate::services::PatientIds;
use crate::state::AppState;

use super::features::{parse_timestamp, parse_window_hours, query_param};

pub(crate) const PREDICTION_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct PredictionResponse {
    pub(crate) patient: PatientIds,
    /// Echo of the requested as-of time, exactly as supplied.
    pub(crate) as_of: String,
    pub(crate) risk_score: f64,
    pub(crate) comorbidity_group: ComorbidityGroup,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub(crate) struct PredictionErrorResponse {
    pub(crate) error: String,
    pub(crate) patient: PatientIds,
    pub(crate) as_of: String,
    pub(crate) window_hours: i64,
}

#[utoipa::path(
    get,
    path = "/api/patients/{subject_id}/{stay_id}/{hadm_id}/prediction",
    tag = "prediction",
    params(
        ("subject_id" = i64, Path, description = "Subject identifier"),
        ("stay_id" = i64, Path, description = "ICU stay identifier"),
        ("hadm_id" = i64, Path, description = "Hospital admission identifier"),
        ("as_of" = String, Query, description = "Prediction time (required)"),
        ("window_hours" = Option<i64>, Query, description = "Lookback window (default 24)")
    ),
    responses(
        (status = 200, description = "Risk estimate", body = PredictionResponse),
        (status = 400, description = "Missing or invalid parameters"),
        (status = 500, description = "Model failure", body = PredictionErrorResponse)
    )
)]
pub(crate) async fn predict_risk(
    axum::extract::State(state): axum::extract::State<AppState>,
    Path((subject_id, stay_id, hadm_id)): Path<(i64, i64, i64)>,
    RawQuery(raw): RawQuery,
) -> Result<Json<PredictionResponse>, Response> {
    let ids = PatientIds {
        subject_id,
        stay_id,
        hadm_id,
    };
    let as_of_raw = query_param(raw.as_deref(), "as_of")
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "Provide as_of (ISO datetime) query param.".to_string(),
            )
                .into_response()
        })?;
    let as_of = parse_timestamp(&as_of_raw, "as_of").map_err(IntoResponse::into_response)?;
    let window_hours = parse_window_hours(raw.as_deref(), PREDICTION_WINDOW_HOURS)
        .map_err(IntoResponse::into_response)?;

    let input = PredictionInput {
        ids,
        as_of,
        window_hours,
    };
    let prediction = state.model.predict(&input).map_err(|err| {
        tracing::error!(
            subject_id = ids.subject_id,
            stay_id = ids.stay_id,
            error = %err,
            "risk prediction failed"
        );
        let body = PredictionErrorResponse {
            error: err.to_string(),
            patient: ids,
            as_of: as_of_raw.clone(),
            window_hours,
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    })?;

    Ok(Json(PredictionResponse {
        patient: ids,
        as_of: as_of_raw,
        risk_score: prediction.risk_score,
        comorbidity_group: prediction.comorbidity_group,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/patients/{subject_id}/{stay_id}/{hadm_id}/prediction",
        get(predict_risk),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        router().with_state(crate::test_support::test_state())
    }

    #[tokio::test]
    async fn prediction_requires_as_of() {
        let resp = app()
            .oneshot(
                Request::builder()
                    .uri("/patients/10002428/35479615/23473524/prediction")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn prediction_rejects_malformed_window_hours() {
        let resp = app()
            .oneshot(
                Request::builder()
                    .uri(
                        "/patients/10002428/35479615/23473524/prediction\
                         ?as_of=2101-03-13T10:00:00&window_hours=day",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn prediction_is_deterministic_for_a_known_patient() {
        let resp = app()
            .oneshot(
                Request::builder()
                    .uri(
                        "/patients/10002428/35479615/23473524/prediction\
                         ?as_of=2101-03-13T10:00:00",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["as_of"], "2101-03-13T10:00:00");
        assert_eq!(body["patient"]["subject_id"], 10002428);
        assert!((body["risk_score"].as_f64().unwrap() - 0.69).abs() < 1e-9);
        assert_eq!(body["comorbidity_group"], "hepatic");
    }
}
