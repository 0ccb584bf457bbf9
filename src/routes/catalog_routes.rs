// src/routes/catalog_routes.rs

use axum::{Json, Router, routing::get};

use crate::models::{
    AppState, HEALTH_CENTERS, HealthCentersResponse, SPECIALTIES, SpecialtiesResponse,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/centros", get(list_health_centers))
        .route("/especialidades", get(list_specialties))
}

pub async fn list_health_centers() -> Json<HealthCentersResponse> {
    Json(HealthCentersResponse {
        centros: HEALTH_CENTERS.iter().map(|s| s.to_string()).collect(),
    })
}

pub async fn list_specialties() -> Json<SpecialtiesResponse> {
    Json(SpecialtiesResponse {
        especialidades: SPECIALTIES.iter().map(|s| s.to_string()).collect(),
    })
}
