use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
}

/* -------------------------
   Catalogs
--------------------------*/

pub const HEALTH_CENTERS: [&str; 5] = [
    "Hospital Central",
    "Clínica del Norte",
    "Centro Médico Sur",
    "Hospital Universitario",
    "Clínica Santa María",
];

pub const SPECIALTIES: [&str; 8] = [
    "Medicina General",
    "Pediatría",
    "Cardiología",
    "Dermatología",
    "Ginecología",
    "Traumatología",
    "Oftalmología",
    "Psicología",
];

/* -------------------------
   Appointment status
--------------------------*/

/// Stored as smallint:
/// 0 Pending, 1 Confirmed, 2 Completed, 3 Cancelled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
pub enum AppointmentStatus {
    #[default]
    #[serde(rename = "Pendiente")]
    Pending = 0,
    #[serde(rename = "Confirmada")]
    Confirmed = 1,
    #[serde(rename = "Completada")]
    Completed = 2,
    #[serde(rename = "Cancelada")]
    Cancelled = 3,
}

impl AppointmentStatus {
    /// Wire name, as used by the JSON API.
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "Pendiente",
            AppointmentStatus::Confirmed => "Confirmada",
            AppointmentStatus::Completed => "Completada",
            AppointmentStatus::Cancelled => "Cancelada",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s.trim() {
            "Pendiente" => Some(AppointmentStatus::Pending),
            "Confirmada" => Some(AppointmentStatus::Confirmed),
            "Completada" => Some(AppointmentStatus::Completed),
            "Cancelada" => Some(AppointmentStatus::Cancelled),
            _ => None,
        }
    }

    /// Pending or Confirmed: the appointment is still going to happen.
    pub fn is_active(self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }
}

/* -------------------------
   DB Row Models
--------------------------*/

/// One `appointment` row. Serializes straight into the API's `cita` object.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AppointmentRow {
    #[serde(rename = "id")]
    pub appointment_id: i64,
    #[serde(rename = "paciente")]
    pub patient_name: String,
    #[serde(rename = "cedula")]
    pub patient_document: Option<String>,
    #[serde(rename = "telefono")]
    pub phone: String,
    #[serde(rename = "centro_salud")]
    pub health_center: String,
    #[serde(rename = "especialidad")]
    pub specialty: String,
    #[serde(rename = "fecha")]
    pub appointment_date: NaiveDate,
    #[serde(rename = "hora")]
    pub appointment_time: String,
    #[serde(rename = "motivo")]
    pub reason: String,
    #[serde(rename = "estado")]
    pub status: AppointmentStatus,
}

/// One `exam` row: a lab or imaging result attached to a patient document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExamRow {
    #[serde(rename = "id")]
    pub exam_id: i64,
    #[serde(rename = "cedula_paciente")]
    pub patient_document: String,
    #[serde(rename = "tipo_examen")]
    pub exam_type: String,
    #[serde(rename = "fecha")]
    pub exam_date: NaiveDate,
    #[serde(rename = "resultado")]
    pub result: String,
    #[serde(rename = "archivo_url", default)]
    pub file_url: Option<String>,
}

/* -------------------------
   API DTOs
--------------------------*/

/// Body of `POST /citas` and `PUT /citas/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAppointment {
    #[serde(rename = "paciente")]
    pub patient_name: String,
    #[serde(rename = "cedula", default)]
    pub patient_document: Option<String>,
    #[serde(rename = "telefono")]
    pub phone: String,
    #[serde(rename = "centro_salud")]
    pub health_center: String,
    #[serde(rename = "especialidad")]
    pub specialty: String,
    #[serde(rename = "fecha")]
    pub date: NaiveDate,
    #[serde(rename = "hora")]
    pub time: String,
    #[serde(rename = "motivo")]
    pub reason: String,
    #[serde(rename = "estado", default)]
    pub status: AppointmentStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub mensaje: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppointmentResponse {
    pub mensaje: String,
    pub cita: AppointmentRow,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppointmentDetailResponse {
    pub cita: AppointmentRow,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AppointmentListResponse {
    pub citas: Vec<AppointmentRow>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCentersResponse {
    pub centros: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SpecialtiesResponse {
    pub especialidades: Vec<String>,
}

/// Body of `POST /examenes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExam {
    #[serde(rename = "cedula_paciente")]
    pub patient_document: String,
    #[serde(rename = "tipo_examen")]
    pub exam_type: String,
    #[serde(rename = "fecha")]
    pub date: NaiveDate,
    #[serde(rename = "resultado")]
    pub result: String,
    #[serde(rename = "archivo_url", default)]
    pub file_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExamResponse {
    pub mensaje: String,
    pub examen: ExamRow,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExamListResponse {
    pub examenes: Vec<ExamRow>,
    pub total: usize,
}

/// Body of `GET /estadisticas`. Keys are sorted, so output is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsResponse {
    pub total_citas: usize,
    pub por_especialidad: BTreeMap<String, usize>,
    pub por_centro: BTreeMap<String, usize>,
    pub por_estado: BTreeMap<String, usize>,
}

/* -------------------------
   Client-side snapshot models
--------------------------*/

/// An appointment as it arrives in a snapshot. Nothing is trusted yet:
/// every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppointmentRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "paciente", default)]
    pub patient_name: Option<String>,
    #[serde(rename = "cedula", default)]
    pub patient_document: Option<String>,
    #[serde(rename = "centro_salud", default)]
    pub health_center: Option<String>,
    #[serde(rename = "especialidad", default)]
    pub specialty: Option<String>,
    #[serde(rename = "fecha", default)]
    pub date: Option<String>,
    #[serde(rename = "hora", default)]
    pub time: Option<String>,
    #[serde(rename = "motivo", default)]
    pub reason: Option<String>,
    #[serde(rename = "estado", default)]
    pub status: Option<String>,
}

impl AppointmentRecord {
    /// Lenient decode of one snapshot element. An element of the wrong shape
    /// still occupies a slot in the snapshot, so it becomes an empty record.
    pub fn from_json(value: serde_json::Value) -> Self {
        match serde_json::from_value::<AppointmentRecord>(value) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("unreadable appointment in snapshot: {e}");
                AppointmentRecord::default()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedAppointment {
    #[error("appointment has no id")]
    MissingId,
    #[error("appointment {id:?} is missing `{field}`")]
    MissingField { id: Option<i64>, field: &'static str },
    #[error("appointment {id:?} has an invalid date `{value}`")]
    InvalidDate { id: Option<i64>, value: String },
    #[error("appointment {id:?} has an unknown status `{value}`")]
    UnknownStatus { id: Option<i64>, value: String },
}

/// A snapshot entry that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appointment {
    pub id: i64,
    pub patient_name: String,
    pub specialty: String,
    pub health_center: String,
    pub date: NaiveDate,
    pub time: String,
    pub status: AppointmentStatus,
}

fn required(
    id: Option<i64>,
    field: &'static str,
    value: &Option<String>,
) -> Result<String, MalformedAppointment> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(MalformedAppointment::MissingField { id, field }),
    }
}

impl TryFrom<&AppointmentRecord> for Appointment {
    type Error = MalformedAppointment;

    fn try_from(r: &AppointmentRecord) -> Result<Self, Self::Error> {
        let id = r.id.ok_or(MalformedAppointment::MissingId)?;
        let patient_name = required(r.id, "paciente", &r.patient_name)?;
        let specialty = required(r.id, "especialidad", &r.specialty)?;
        let health_center = required(r.id, "centro_salud", &r.health_center)?;
        let raw_date = required(r.id, "fecha", &r.date)?;
        let time = required(r.id, "hora", &r.time)?;
        let raw_status = required(r.id, "estado", &r.status)?;

        let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d").map_err(|_| {
            MalformedAppointment::InvalidDate {
                id: r.id,
                value: raw_date.clone(),
            }
        })?;
        let status = AppointmentStatus::from_wire(&raw_status).ok_or(
            MalformedAppointment::UnknownStatus {
                id: r.id,
                value: raw_status.clone(),
            },
        )?;

        Ok(Self {
            id,
            patient_name,
            specialty,
            health_center,
            date,
            time,
            status,
        })
    }
}

/* -------------------------
   Helpers
--------------------------*/

pub fn is_health_center(name: &str) -> bool {
    HEALTH_CENTERS.contains(&name.trim())
}

pub fn is_specialty(name: &str) -> bool {
    SPECIALTIES.contains(&name.trim())
}

/// `HH:MM`, 24h.
pub fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64) -> AppointmentRecord {
        AppointmentRecord {
            id: Some(id),
            patient_name: Some("Juan Pérez".into()),
            patient_document: Some("1234567890".into()),
            health_center: Some("Hospital Central".into()),
            specialty: Some("Pediatría".into()),
            date: Some("2026-03-11".into()),
            time: Some("09:30".into()),
            reason: Some("Control".into()),
            status: Some("Confirmada".into()),
        }
    }

    #[test]
    fn status_uses_spanish_wire_names() {
        let json = serde_json::to_string(&AppointmentStatus::Cancelled).unwrap();
        assert_eq!(json, "\"Cancelada\"");
        let back: AppointmentStatus = serde_json::from_str("\"Confirmada\"").unwrap();
        assert_eq!(back, AppointmentStatus::Confirmed);
        assert_eq!(AppointmentStatus::from_wire("Desconocida"), None);
    }

    #[test]
    fn valid_record_converts() {
        let a = Appointment::try_from(&record(7)).unwrap();
        assert_eq!(a.id, 7);
        assert_eq!(a.status, AppointmentStatus::Confirmed);
        assert_eq!(a.date, NaiveDate::from_ymd_opt(2026, 3, 11).unwrap());
    }

    #[test]
    fn missing_fields_are_reported() {
        let mut r = record(3);
        r.specialty = None;
        assert_eq!(
            Appointment::try_from(&r),
            Err(MalformedAppointment::MissingField {
                id: Some(3),
                field: "especialidad"
            })
        );

        let mut r = record(3);
        r.id = None;
        assert_eq!(Appointment::try_from(&r), Err(MalformedAppointment::MissingId));

        let mut r = record(3);
        r.patient_name = Some("   ".into());
        assert!(matches!(
            Appointment::try_from(&r),
            Err(MalformedAppointment::MissingField { field: "paciente", .. })
        ));
    }

    #[test]
    fn bad_date_and_status_are_reported() {
        let mut r = record(4);
        r.date = Some("11/03/2026".into());
        assert!(matches!(
            Appointment::try_from(&r),
            Err(MalformedAppointment::InvalidDate { .. })
        ));

        let mut r = record(4);
        r.status = Some("Perdida".into());
        assert!(matches!(
            Appointment::try_from(&r),
            Err(MalformedAppointment::UnknownStatus { .. })
        ));
    }

    #[test]
    fn wrongly_shaped_json_becomes_empty_record() {
        let r = AppointmentRecord::from_json(serde_json::json!({ "id": "seven" }));
        assert_eq!(r, AppointmentRecord::default());

        let r = AppointmentRecord::from_json(serde_json::json!({ "id": 9, "estado": "Pendiente" }));
        assert_eq!(r.id, Some(9));
        assert_eq!(r.status.as_deref(), Some("Pendiente"));
    }

    #[test]
    fn new_appointment_defaults_to_pending() {
        let body = serde_json::json!({
            "paciente": "María López",
            "telefono": "3001112233",
            "centro_salud": "Clínica del Norte",
            "especialidad": "Cardiología",
            "fecha": "2026-05-02",
            "hora": "14:00",
            "motivo": "Chequeo"
        });
        let req: NewAppointment = serde_json::from_value(body).unwrap();
        assert_eq!(req.status, AppointmentStatus::Pending);
        assert_eq!(req.patient_document, None);
    }

    #[test]
    fn exam_uses_original_field_names() {
        let body = serde_json::json!({
            "cedula_paciente": "1234567890",
            "tipo_examen": "Hemograma",
            "fecha": "2026-02-20",
            "resultado": "Normal"
        });
        let req: NewExam = serde_json::from_value(body).unwrap();
        assert_eq!(req.exam_type, "Hemograma");
        assert_eq!(req.file_url, None);
    }

    #[test]
    fn catalog_and_time_helpers() {
        assert!(is_health_center("Hospital Central"));
        assert!(!is_health_center("Hospital Inventado"));
        assert!(is_specialty(" Psicología "));
        assert!(parse_time_of_day("08:15").is_some());
        assert!(parse_time_of_day("8h15").is_none());
    }
}
