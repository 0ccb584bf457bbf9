use chrono::{DateTime, Local};

use super::rules::{self, RuleSet};
use super::view::FeedView;
use super::{Notification, NotificationKind, PortalVariant};
use crate::models::AppointmentRecord;

/// What changed in the retained list. Listeners get the event and the list as
/// it stands afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Merged { added: usize },
    Recorded { id: String },
    MarkedRead { id: String },
    MarkedAllRead,
}

type Listener = Box<dyn Fn(&EngineEvent, &[Notification]) + Send + Sync>;

/// Owns the session's notifications.
///
/// Invariants kept by every method:
/// - ids are unique in the retained list; a duplicate candidate is dropped,
///   never written over the existing entry
/// - `read` only ever goes from `false` to `true`
/// - entries are never removed
/// - the list is ordered by `created_at`, newest first
pub struct NotificationEngine {
    rules: RuleSet,
    retained: Vec<Notification>,
    listeners: Vec<Listener>,
}

impl NotificationEngine {
    pub fn new(variant: PortalVariant) -> Self {
        Self::with_rules(RuleSet::for_variant(variant))
    }

    pub fn with_rules(rules: RuleSet) -> Self {
        Self {
            rules,
            retained: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Registers a callback run after every mutation.
    pub fn subscribe(
        &mut self,
        listener: impl Fn(&EngineEvent, &[Notification]) + Send + Sync + 'static,
    ) {
        self.listeners.push(Box::new(listener));
    }

    pub fn derive_from_snapshot(
        &self,
        snapshot: &[AppointmentRecord],
        now: DateTime<Local>,
    ) -> Vec<Notification> {
        rules::derive(&self.rules, snapshot, now)
    }

    /// Inserts candidates whose id is not retained yet. Returns how many were
    /// added.
    pub fn merge(&mut self, candidates: impl IntoIterator<Item = Notification>) -> usize {
        let mut added = 0;
        for candidate in candidates {
            if self.contains(&candidate.id) {
                tracing::debug!(id = %candidate.id, "duplicate notification discarded");
                continue;
            }
            self.retained.insert(0, candidate);
            added += 1;
        }
        self.sort();
        tracing::debug!(added, retained = self.retained.len(), "notifications merged");

        self.emit(&EngineEvent::Merged { added });
        added
    }

    /// Derive + merge in one pass.
    pub fn refresh(&mut self, snapshot: &[AppointmentRecord], now: DateTime<Local>) -> usize {
        let candidates = self.derive_from_snapshot(snapshot, now);
        self.merge(candidates)
    }

    /// Adds a notification for something the current user just did. The id is
    /// built from the creation time in nanoseconds, stepped forward if that
    /// value is already taken.
    pub fn record_own_submission(
        &mut self,
        kind: NotificationKind,
        icon_hint: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Local>,
    ) -> String {
        let mut stamp = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros());
        let mut id = format!("notif-{stamp}");
        while self.contains(&id) {
            stamp += 1;
            id = format!("notif-{stamp}");
        }

        self.retained.insert(
            0,
            Notification::new(id.clone(), kind, icon_hint, title, message, now),
        );
        self.sort();

        self.emit(&EngineEvent::Recorded { id: id.clone() });
        id
    }

    /// Unknown ids are ignored. Returns whether an entry matched.
    pub fn mark_read(&mut self, id: &str) -> bool {
        let Some(n) = self.retained.iter_mut().find(|n| n.id == id) else {
            return false;
        };
        n.read = true;

        self.emit(&EngineEvent::MarkedRead { id: id.to_string() });
        true
    }

    pub fn mark_all_read(&mut self) {
        for n in &mut self.retained {
            n.read = true;
        }
        self.emit(&EngineEvent::MarkedAllRead);
    }

    pub fn unread_count(&self) -> usize {
        self.retained.iter().filter(|n| !n.read).count()
    }

    /// Unread count for the badge; `None` means the badge is hidden.
    pub fn badge(&self) -> Option<usize> {
        match self.unread_count() {
            0 => None,
            n => Some(n),
        }
    }

    /// Newest first.
    pub fn visible(&self) -> &[Notification] {
        &self.retained
    }

    pub fn get(&self, id: &str) -> Option<&Notification> {
        self.retained.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.retained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }

    pub fn feed_view(&self, now: DateTime<Local>) -> FeedView {
        FeedView::build(&self.retained, now)
    }

    // stable, so equal timestamps keep insertion order (newest insert first)
    fn sort(&mut self) {
        self.retained.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    fn emit(&self, event: &EngineEvent) {
        for listener in &self.listeners {
            listener(event, &self.retained);
        }
    }
}
