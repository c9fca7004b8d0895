use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
pub struct DatabaseHealth {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub database: DatabaseHealth,
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Service health", body = HealthResponse))
)]
pub(crate) async fn healthz_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<HealthResponse> {
    let database = match crate::db::healthcheck(&state.db).await {
        Ok(()) => DatabaseHealth {
            ok: true,
            error: None,
        },
        Err(err) => DatabaseHealth {
            ok: false,
            error: Some(err.to_string()),
        },
    };
    let status = if database.ok { "ok" } else { "degraded" };
    Json(HealthResponse {
        status: status.to_string(),
        database,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz_handler))
}
