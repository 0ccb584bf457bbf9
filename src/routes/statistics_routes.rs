// src/routes/statistics_routes.rs

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};

use crate::{
    error::ApiError,
    models::{AppState, AppointmentRow, StatisticsResponse},
    routes::appointment_routes::{fetch_appointments, OwnerQuery},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/estadisticas", get(get_statistics))
}

pub fn summarize(rows: &[AppointmentRow]) -> StatisticsResponse {
    let mut stats = StatisticsResponse {
        total_citas: rows.len(),
        ..Default::default()
    };
    for r in rows {
        *stats.por_especialidad.entry(r.specialty.clone()).or_default() += 1;
        *stats.por_centro.entry(r.health_center.clone()).or_default() += 1;
        *stats
            .por_estado
            .entry(r.status.as_str().to_string())
            .or_default() += 1;
    }
    stats
}

pub async fn get_statistics(
    State(state): State<AppState>,
    Query(q): Query<OwnerQuery>,
) -> Result<Json<StatisticsResponse>, ApiError> {
    let rows = fetch_appointments(&state, q.owner()).await?;
    Ok(Json(summarize(&rows)))
}
