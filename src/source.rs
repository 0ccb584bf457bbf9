// src/source.rs

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::SourceError;
use crate::models::{
    AppointmentRecord, AppointmentResponse, ExamListResponse, ExamRow, HealthCentersResponse,
    NewAppointment, SpecialtiesResponse, StatisticsResponse,
};

/// The appointments backend, as the portal sees it.
#[async_trait]
pub trait AppointmentSource: Send + Sync {
    /// Full snapshot, optionally limited to one patient's document number.
    async fn get_appointments(
        &self,
        owner: Option<&str>,
    ) -> Result<Vec<AppointmentRecord>, SourceError>;

    /// Returns the id the backend assigned.
    async fn create_appointment(&self, appointment: &NewAppointment) -> Result<i64, SourceError>;

    async fn cancel_appointment(&self, id: i64) -> Result<(), SourceError>;

    async fn confirm_appointment(&self, id: i64) -> Result<(), SourceError>;

    async fn health_centers(&self) -> Result<Vec<String>, SourceError>;

    async fn specialties(&self) -> Result<Vec<String>, SourceError>;

    /// Counts over the same rows `get_appointments` would return.
    async fn statistics(&self, owner: Option<&str>) -> Result<StatisticsResponse, SourceError>;

    async fn exams(&self, document: &str) -> Result<Vec<ExamRow>, SourceError>;
}

/// Snapshot envelope. Elements stay raw JSON so one bad element does not
/// fail the whole list.
#[derive(Debug, Deserialize)]
struct SnapshotEnvelope {
    citas: Vec<serde_json::Value>,
}

pub fn parse_snapshot(body: &str) -> Result<Vec<AppointmentRecord>, SourceError> {
    let env: SnapshotEnvelope =
        serde_json::from_str(body).map_err(|e| SourceError::Decode(format!("appointments: {e}")))?;
    Ok(env
        .citas
        .into_iter()
        .map(AppointmentRecord::from_json)
        .collect())
}

#[derive(Debug, Clone)]
pub struct HttpAppointmentSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAppointmentSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `/examenes/{document}`, with the document encoded as one path segment.
    fn exams_url(&self, document: &str) -> Result<reqwest::Url, SourceError> {
        let mut url = reqwest::Url::parse(&self.url("/examenes"))
            .map_err(|e| SourceError::Decode(format!("exam url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::Decode("exam url: base cannot hold a path".into()))?
            .push(document.trim());
        Ok(url)
    }

    /// Reads the body, turning non-success statuses into `SourceError::Status`.
    async fn body(resp: reqwest::Response) -> Result<String, SourceError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(SourceError::from_status(status.as_u16(), &body));
        }
        Ok(body)
    }

    fn decode<T: serde::de::DeserializeOwned>(what: &str, body: &str) -> Result<T, SourceError> {
        serde_json::from_str(body).map_err(|e| SourceError::Decode(format!("{what}: {e}")))
    }
}

#[async_trait]
impl AppointmentSource for HttpAppointmentSource {
    async fn get_appointments(
        &self,
        owner: Option<&str>,
    ) -> Result<Vec<AppointmentRecord>, SourceError> {
        let mut req = self.client.get(self.url("/citas"));
        if let Some(owner) = owner {
            req = req.query(&[("cedula", owner)]);
        }
        let body = Self::body(req.send().await?).await?;
        parse_snapshot(&body)
    }

    async fn create_appointment(&self, appointment: &NewAppointment) -> Result<i64, SourceError> {
        let resp = self
            .client
            .post(self.url("/citas"))
            .json(appointment)
            .send()
            .await?;
        let body = Self::body(resp).await?;
        let created: AppointmentResponse = Self::decode("created appointment", &body)?;
        Ok(created.cita.appointment_id)
    }

    async fn cancel_appointment(&self, id: i64) -> Result<(), SourceError> {
        let resp = self
            .client
            .delete(self.url(&format!("/citas/{id}")))
            .send()
            .await?;
        Self::body(resp).await?;
        Ok(())
    }

    async fn confirm_appointment(&self, id: i64) -> Result<(), SourceError> {
        let resp = self
            .client
            .patch(self.url(&format!("/citas/{id}/confirmar")))
            .send()
            .await?;
        Self::body(resp).await?;
        Ok(())
    }

    async fn health_centers(&self) -> Result<Vec<String>, SourceError> {
        let body = Self::body(self.client.get(self.url("/centros")).send().await?).await?;
        let env: HealthCentersResponse = Self::decode("health centers", &body)?;
        Ok(env.centros)
    }

    async fn specialties(&self) -> Result<Vec<String>, SourceError> {
        let body = Self::body(self.client.get(self.url("/especialidades")).send().await?).await?;
        let env: SpecialtiesResponse = Self::decode("specialties", &body)?;
        Ok(env.especialidades)
    }

    async fn statistics(&self, owner: Option<&str>) -> Result<StatisticsResponse, SourceError> {
        let mut req = self.client.get(self.url("/estadisticas"));
        if let Some(owner) = owner {
            req = req.query(&[("cedula", owner)]);
        }
        let body = Self::body(req.send().await?).await?;
        Self::decode("statistics", &body)
    }

    async fn exams(&self, document: &str) -> Result<Vec<ExamRow>, SourceError> {
        let url = self.exams_url(document)?;
        let body = Self::body(self.client.get(url).send().await?).await?;
        let env: ExamListResponse = Self::decode("exams", &body)?;
        Ok(env.examenes)
    }
}
