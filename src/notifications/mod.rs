//! Client-side notification feed.
//!
//! The feed is derived by scanning the current appointment snapshot
//! ([`rules`]), merged into a session-lifetime retained list that keeps read
//! flags across refreshes ([`engine`]), and turned into display rows with
//! relative ages and a badge count ([`view`]).

use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

pub mod engine;
pub mod rules;
pub mod view;

pub use engine::{EngineEvent, NotificationEngine};
pub use rules::RuleSet;
pub use view::{relative_age, FeedView, RenderedNotification};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Success => "success",
            NotificationKind::Warning => "warning",
        }
    }
}

/// Which portal the engine is running for. The two portals derive different
/// notifications from the same snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortalVariant {
    Patient,
    Admin,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown portal variant `{0}` (expected `patient` or `admin`)")]
pub struct UnknownVariant(String);

impl FromStr for PortalVariant {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" | "paciente" => Ok(PortalVariant::Patient),
            "admin" | "administrator" | "administrador" => Ok(PortalVariant::Admin),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Deduplication key, derived from the source event.
    pub id: String,
    pub kind: NotificationKind,
    /// Presentational hint (icon name); the engine never looks at it.
    pub icon_hint: String,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Local>,
    pub read: bool,
}

impl Notification {
    pub fn new(
        id: impl Into<String>,
        kind: NotificationKind,
        icon_hint: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        created_at: DateTime<Local>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            icon_hint: icon_hint.into(),
            title: title.into(),
            message: message.into(),
            created_at,
            read: false,
        }
    }
}
