use std::env;
use std::time::Duration;

use anyhow::Context;

use crate::notifications::PortalVariant;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8001".to_string());

        Ok(Self {
            database_url,
            bind_addr,
        })
    }
}

#[derive(Clone, Debug)]
pub struct PortalConfig {
    pub api_url: String,
    pub variant: PortalVariant,
    /// Owner filter for the patient portal (document number).
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub patient_phone: Option<String>,
    /// `None` disables the periodic snapshot refresh.
    pub refresh_every: Option<Duration>,
    pub age_refresh_every: Duration,
}

impl PortalConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let api_url = lookup("API_URL")
            .unwrap_or_else(|| "http://localhost:8001".to_string())
            .trim_end_matches('/')
            .to_string();

        let variant = match lookup("PORTAL_VARIANT") {
            Some(v) => v.parse::<PortalVariant>()?,
            None => PortalVariant::Patient,
        };

        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let patient_id = non_blank("PATIENT_ID");
        if variant == PortalVariant::Patient && patient_id.is_none() {
            anyhow::bail!("PATIENT_ID must be set for the patient portal");
        }

        let default_refresh = match variant {
            PortalVariant::Patient => 30,
            PortalVariant::Admin => 0,
        };
        let refresh_secs = lookup("REFRESH_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(default_refresh);
        let age_refresh_secs = lookup("AGE_REFRESH_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .unwrap_or(60);

        Ok(Self {
            api_url,
            variant,
            patient_id,
            patient_name: non_blank("PATIENT_NAME"),
            patient_phone: non_blank("PATIENT_PHONE"),
            refresh_every: (refresh_secs > 0).then(|| Duration::from_secs(refresh_secs)),
            age_refresh_every: Duration::from_secs(age_refresh_secs),
        })
    }
}
