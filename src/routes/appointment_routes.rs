// src/routes/appointment_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, patch},
    Json, Router,
};
use serde::Deserialize;

use crate::{
    error::ApiError,
    models::{
        is_health_center, is_specialty, parse_time_of_day, AppState, AppointmentDetailResponse,
        AppointmentListResponse, AppointmentResponse, AppointmentRow, AppointmentStatus,
        MessageResponse, NewAppointment,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/citas", get(list_appointments).post(create_appointment))
        .route(
            "/citas/{appointment_id}",
            get(get_appointment)
                .put(update_appointment)
                .delete(cancel_appointment),
        )
        .route("/citas/{appointment_id}/confirmar", patch(confirm_appointment))
}

const SELECT_APPOINTMENT: &str = r#"
    SELECT
      appointment_id,
      patient_name,
      patient_document,
      phone,
      health_center,
      specialty,
      appointment_date,
      appointment_time,
      reason,
      status
    FROM appointment
"#;

/* ============================================================
   Query params
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    /// Patient document number; absent means every appointment.
    pub cedula: Option<String>,
}

impl OwnerQuery {
    pub fn owner(&self) -> Option<&str> {
        self.cedula.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/* ============================================================
   Validation
   ============================================================ */

pub fn validate_new_appointment(req: &NewAppointment) -> Result<(), ApiError> {
    if req.patient_name.trim().is_empty() {
        return Err(ApiError::validation("paciente is required"));
    }
    if req.phone.trim().is_empty() {
        return Err(ApiError::validation("telefono is required"));
    }
    if req.reason.trim().is_empty() {
        return Err(ApiError::validation("motivo is required"));
    }
    if !is_health_center(&req.health_center) {
        return Err(ApiError::validation(format!(
            "unknown centro_salud `{}`",
            req.health_center
        )));
    }
    if !is_specialty(&req.specialty) {
        return Err(ApiError::validation(format!(
            "unknown especialidad `{}`",
            req.specialty
        )));
    }
    if parse_time_of_day(&req.time).is_none() {
        return Err(ApiError::validation("hora must be HH:MM"));
    }
    Ok(())
}

fn db_error(e: sqlx::Error) -> ApiError {
    ApiError::Internal(format!("db error: {e}"))
}

/* ============================================================
   Shared queries
   ============================================================ */

pub async fn fetch_appointments(
    state: &AppState,
    owner: Option<&str>,
) -> Result<Vec<AppointmentRow>, ApiError> {
    let sql = format!(
        "{SELECT_APPOINTMENT} WHERE ($1::text IS NULL OR patient_document = $1) ORDER BY appointment_id ASC"
    );
    sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(owner)
        .fetch_all(&state.db)
        .await
        .map_err(db_error)
}

async fn fetch_appointment(state: &AppState, appointment_id: i64) -> Result<AppointmentRow, ApiError> {
    let sql = format!("{SELECT_APPOINTMENT} WHERE appointment_id = $1");
    sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(appointment_id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(ApiError::appointment_not_found)
}

async fn set_status(
    state: &AppState,
    appointment_id: i64,
    status: AppointmentStatus,
) -> Result<AppointmentRow, ApiError> {
    let updated: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE appointment
        SET status = $2,
            updated_at = now()
        WHERE appointment_id = $1
        RETURNING appointment_id
        "#,
    )
    .bind(appointment_id)
    .bind(status)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?;

    if updated.is_none() {
        return Err(ApiError::appointment_not_found());
    }
    fetch_appointment(state, appointment_id).await
}

/* ============================================================
   GET /citas
   ============================================================ */

pub async fn list_appointments(
    State(state): State<AppState>,
    Query(q): Query<OwnerQuery>,
) -> Result<Json<AppointmentListResponse>, ApiError> {
    let citas = fetch_appointments(&state, q.owner()).await?;
    Ok(Json(AppointmentListResponse {
        total: citas.len(),
        citas,
    }))
}

/* ============================================================
   GET /citas/{id}
   ============================================================ */

pub async fn get_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<i64>,
) -> Result<Json<AppointmentDetailResponse>, ApiError> {
    let cita = fetch_appointment(&state, appointment_id).await?;
    Ok(Json(AppointmentDetailResponse { cita }))
}

/* ============================================================
   POST /citas
   ============================================================ */

pub async fn create_appointment(
    State(state): State<AppState>,
    Json(req): Json<NewAppointment>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    validate_new_appointment(&req)?;

    let appointment_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO appointment (
          patient_name,
          patient_document,
          phone,
          health_center,
          specialty,
          appointment_date,
          appointment_time,
          reason,
          status
        )
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
        RETURNING appointment_id
        "#,
    )
    .bind(req.patient_name.trim())
    .bind(req.patient_document.as_deref().map(str::trim))
    .bind(req.phone.trim())
    .bind(req.health_center.trim())
    .bind(req.specialty.trim())
    .bind(req.date)
    .bind(req.time.trim())
    .bind(req.reason.trim())
    .bind(req.status)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("APPOINTMENT_CREATE_FAILED", format!("{e}")))?;

    tracing::info!(appointment_id, specialty = %req.specialty, "appointment created");

    let cita = fetch_appointment(&state, appointment_id).await?;
    Ok(Json(AppointmentResponse {
        mensaje: "Appointment booked".to_string(),
        cita,
    }))
}

/* ============================================================
   PUT /citas/{id}  (replace)
   ============================================================ */

pub async fn update_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<i64>,
    Json(req): Json<NewAppointment>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    validate_new_appointment(&req)?;

    let updated: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE appointment
        SET
          patient_name     = $2,
          patient_document = $3,
          phone            = $4,
          health_center    = $5,
          specialty        = $6,
          appointment_date = $7,
          appointment_time = $8,
          reason           = $9,
          status           = $10,
          updated_at = now()
        WHERE appointment_id = $1
        RETURNING appointment_id
        "#,
    )
    .bind(appointment_id)
    .bind(req.patient_name.trim())
    .bind(req.patient_document.as_deref().map(str::trim))
    .bind(req.phone.trim())
    .bind(req.health_center.trim())
    .bind(req.specialty.trim())
    .bind(req.date)
    .bind(req.time.trim())
    .bind(req.reason.trim())
    .bind(req.status)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("APPOINTMENT_UPDATE_FAILED", format!("{e}")))?;

    if updated.is_none() {
        return Err(ApiError::appointment_not_found());
    }

    let cita = fetch_appointment(&state, appointment_id).await?;
    Ok(Json(AppointmentResponse {
        mensaje: "Appointment updated".to_string(),
        cita,
    }))
}

/* ============================================================
   Status transitions
   ============================================================ */

pub async fn confirm_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<i64>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    let cita = set_status(&state, appointment_id, AppointmentStatus::Confirmed).await?;
    tracing::info!(appointment_id, "appointment confirmed");
    Ok(Json(AppointmentResponse {
        mensaje: "Appointment confirmed".to_string(),
        cita,
    }))
}

/// Soft cancel: the row stays, with status Cancelled.
pub async fn cancel_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    set_status(&state, appointment_id, AppointmentStatus::Cancelled).await?;
    tracing::info!(appointment_id, "appointment cancelled");
    Ok(Json(MessageResponse {
        mensaje: "Appointment cancelled".to_string(),
    }))
}
