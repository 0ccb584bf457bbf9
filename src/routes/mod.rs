use crate::models::AppState;
use axum::Router;

pub mod appointment_routes;
pub mod catalog_routes;
pub mod exam_routes;
pub mod home_routes;
pub mod statistics_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(home_routes::router())
        .merge(catalog_routes::router())
        .merge(appointment_routes::router())
        .merge(exam_routes::router())
        .merge(statistics_routes::router())
        .with_state(state)
}
