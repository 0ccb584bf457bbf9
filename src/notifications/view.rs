use chrono::{DateTime, Local};
use serde::Serialize;

use super::{Notification, NotificationKind};

/// How long ago `created_at` was, in the coarsest whole unit that fits.
/// Timestamps in the future read as "just now".
pub fn relative_age(created_at: DateTime<Local>, now: DateTime<Local>) -> String {
    let elapsed = (now - created_at).num_seconds();

    if elapsed < 60 {
        return "just now".to_string();
    }

    let (count, unit) = if elapsed < 3_600 {
        (elapsed / 60, "minute")
    } else if elapsed < 86_400 {
        (elapsed / 3_600, "hour")
    } else {
        (elapsed / 86_400, "day")
    };

    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedNotification {
    pub id: String,
    pub kind: NotificationKind,
    pub icon_hint: String,
    pub title: String,
    pub message: String,
    pub age: String,
    pub read: bool,
}

/// What the renderer draws: rows newest first, and the badge value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedView {
    pub items: Vec<RenderedNotification>,
    /// `None` hides the badge.
    pub badge: Option<usize>,
}

impl FeedView {
    pub fn build(notifications: &[Notification], now: DateTime<Local>) -> Self {
        let items: Vec<RenderedNotification> = notifications
            .iter()
            .map(|n| RenderedNotification {
                id: n.id.clone(),
                kind: n.kind,
                icon_hint: n.icon_hint.clone(),
                title: n.title.clone(),
                message: n.message.clone(),
                age: relative_age(n.created_at, now),
                read: n.read,
            })
            .collect();

        let unread = items.iter().filter(|i| !i.read).count();
        Self {
            items,
            badge: (unread > 0).then_some(unread),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
