// src/routes/exam_routes.rs

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::{
    error::ApiError,
    models::{AppState, ExamListResponse, ExamResponse, ExamRow, NewExam},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/examenes", post(create_exam))
        .route("/examenes/{cedula}", get(list_patient_exams))
}

const SELECT_EXAM: &str = r#"
    SELECT
      exam_id,
      patient_document,
      exam_type,
      exam_date,
      result,
      file_url
    FROM exam
"#;

pub fn validate_new_exam(req: &NewExam) -> Result<(), ApiError> {
    if req.patient_document.trim().is_empty() {
        return Err(ApiError::validation("cedula_paciente is required"));
    }
    if req.exam_type.trim().is_empty() {
        return Err(ApiError::validation("tipo_examen is required"));
    }
    if req.result.trim().is_empty() {
        return Err(ApiError::validation("resultado is required"));
    }
    Ok(())
}

/* ============================================================
   POST /examenes
   ============================================================ */

pub async fn create_exam(
    State(state): State<AppState>,
    Json(req): Json<NewExam>,
) -> Result<Json<ExamResponse>, ApiError> {
    validate_new_exam(&req)?;

    let examen = sqlx::query_as::<_, ExamRow>(
        r#"
        INSERT INTO exam (patient_document, exam_type, exam_date, result, file_url)
        VALUES ($1,$2,$3,$4,$5)
        RETURNING exam_id, patient_document, exam_type, exam_date, result, file_url
        "#,
    )
    .bind(req.patient_document.trim())
    .bind(req.exam_type.trim())
    .bind(req.date)
    .bind(req.result.trim())
    .bind(
        req.file_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty()),
    )
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::BadRequest("EXAM_CREATE_FAILED", format!("{e}")))?;

    tracing::info!(exam_id = examen.exam_id, exam_type = %examen.exam_type, "exam recorded");

    Ok(Json(ExamResponse {
        mensaje: "Exam recorded".to_string(),
        examen,
    }))
}

/* ============================================================
   GET /examenes/{cedula}
   ============================================================ */

pub async fn list_patient_exams(
    State(state): State<AppState>,
    Path(cedula): Path<String>,
) -> Result<Json<ExamListResponse>, ApiError> {
    let sql = format!("{SELECT_EXAM} WHERE patient_document = $1 ORDER BY exam_date DESC, exam_id DESC");
    let examenes = sqlx::query_as::<_, ExamRow>(&sql)
        .bind(cedula.trim())
        .fetch_all(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(ExamListResponse {
        total: examenes.len(),
        examenes,
    }))
}
