pub mod features;
pub mod health;
pub mod patients;
pub mod prediction;
pub mod simulation;

use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .merge(patients::router())
                .merge(simulation::router())
                .merge(features::router())
                .merge(prediction::router())
                .merge(crate::openapi::router()),
        )
        .with_state(state)
}
