use chrono::{DateTime, Duration, Local, NaiveDate};

use super::{Notification, NotificationKind, PortalVariant};
use crate::models::{Appointment, AppointmentRecord, AppointmentStatus};

/// Minutes a reminder is backdated by, per portal.
pub const REMINDER_BACKDATE_MINUTES_PATIENT: i64 = 60;
pub const REMINDER_BACKDATE_MINUTES_ADMIN: i64 = 120;
pub const CONFIRMATION_BACKDATE_MINUTES: i64 = 120;

/// How many of the newest appointments get a "new appointment" entry.
pub const RECENT_WINDOW: usize = 3;
/// Rank 0 is backdated one step, rank 1 two steps, and so on.
pub const RECENT_STEP_MINUTES: i64 = 15;

/// The summary appears once the snapshot holds more than this many entries.
pub const VOLUME_THRESHOLD: usize = 10;
pub const VOLUME_BACKDATE_MINUTES: i64 = 180;

pub const VOLUME_ID: &str = "sistema-1";
pub const WELCOME_ID: &str = "welcome";

pub fn reminder_id(appointment_id: i64) -> String {
    format!("cita-{appointment_id}")
}

pub fn confirmation_id(appointment_id: i64) -> String {
    format!("confirmada-{appointment_id}")
}

pub fn recent_id(appointment_id: i64) -> String {
    format!("nueva-{appointment_id}")
}

/// Which rules run, and with what offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    pub variant: PortalVariant,
    pub reminder_backdate: Duration,
    pub confirmation_backdate: Duration,
    /// `None` disables the recency rule.
    pub recent_window: Option<usize>,
    pub recent_step: Duration,
    /// `None` disables the volume rule.
    pub volume_threshold: Option<usize>,
    pub volume_backdate: Duration,
    pub welcome_on_empty: bool,
}

impl RuleSet {
    pub fn for_variant(variant: PortalVariant) -> Self {
        match variant {
            PortalVariant::Patient => Self {
                variant,
                reminder_backdate: Duration::minutes(REMINDER_BACKDATE_MINUTES_PATIENT),
                confirmation_backdate: Duration::minutes(CONFIRMATION_BACKDATE_MINUTES),
                recent_window: None,
                recent_step: Duration::minutes(RECENT_STEP_MINUTES),
                volume_threshold: None,
                volume_backdate: Duration::minutes(VOLUME_BACKDATE_MINUTES),
                welcome_on_empty: true,
            },
            PortalVariant::Admin => Self {
                variant,
                reminder_backdate: Duration::minutes(REMINDER_BACKDATE_MINUTES_ADMIN),
                confirmation_backdate: Duration::minutes(CONFIRMATION_BACKDATE_MINUTES),
                recent_window: Some(RECENT_WINDOW),
                recent_step: Duration::minutes(RECENT_STEP_MINUTES),
                volume_threshold: Some(VOLUME_THRESHOLD),
                volume_backdate: Duration::minutes(VOLUME_BACKDATE_MINUTES),
                welcome_on_empty: false,
            },
        }
    }
}

/// Scans a snapshot and returns candidate notifications. Pure: the engine's
/// retained list is not consulted, so the same snapshot always yields the
/// same ids and content (only `created_at` follows `now`).
///
/// Entries that fail validation are logged and skipped; the rest of the
/// snapshot is still evaluated.
pub fn derive(
    rules: &RuleSet,
    snapshot: &[AppointmentRecord],
    now: DateTime<Local>,
) -> Vec<Notification> {
    let appointments: Vec<Appointment> = snapshot
        .iter()
        .filter_map(|record| match Appointment::try_from(record) {
            Ok(a) => Some(a),
            Err(e) => {
                tracing::warn!("skipping appointment in notification scan: {e}");
                None
            }
        })
        .collect();

    let tomorrow = now.date_naive().succ_opt();
    let mut out = Vec::new();

    for a in &appointments {
        if let Some(n) = reminder(rules, a, tomorrow, now) {
            out.push(n);
        }
        if let Some(n) = confirmation(rules, a, now) {
            out.push(n);
        }
    }

    if let Some(window) = rules.recent_window {
        out.extend(recent(rules, &appointments, window, now));
    }

    if let Some(threshold) = rules.volume_threshold {
        if snapshot.len() > threshold {
            out.push(volume(rules, snapshot.len(), now));
        }
    }

    if rules.welcome_on_empty && snapshot.is_empty() {
        out.push(welcome(now));
    }

    out
}

fn reminder(
    rules: &RuleSet,
    a: &Appointment,
    tomorrow: Option<NaiveDate>,
    now: DateTime<Local>,
) -> Option<Notification> {
    if Some(a.date) != tomorrow || !a.status.is_active() {
        return None;
    }

    let (icon, title, message) = match rules.variant {
        PortalVariant::Patient => (
            "calendar-check",
            "Appointment reminder",
            format!(
                "You have an appointment tomorrow: {} at {} at {}",
                a.specialty, a.health_center, a.time
            ),
        ),
        PortalVariant::Admin => (
            "calendar-alt",
            "Appointment tomorrow",
            format!("{} - {} at {}", a.patient_name, a.specialty, a.time),
        ),
    };

    Some(Notification::new(
        reminder_id(a.id),
        NotificationKind::Warning,
        icon,
        title,
        message,
        now - rules.reminder_backdate,
    ))
}

fn confirmation(rules: &RuleSet, a: &Appointment, now: DateTime<Local>) -> Option<Notification> {
    if a.status != AppointmentStatus::Confirmed {
        return None;
    }

    let date = a.date.format("%d/%m/%Y");
    let message = match rules.variant {
        PortalVariant::Patient => {
            format!("Your {} appointment has been confirmed for {date}", a.specialty)
        }
        PortalVariant::Admin => format!(
            "{}'s {} appointment is confirmed for {date}",
            a.patient_name, a.specialty
        ),
    };

    Some(Notification::new(
        confirmation_id(a.id),
        NotificationKind::Success,
        "check-circle",
        "Appointment confirmed",
        message,
        now - rules.confirmation_backdate,
    ))
}

fn recent(
    rules: &RuleSet,
    appointments: &[Appointment],
    window: usize,
    now: DateTime<Local>,
) -> Vec<Notification> {
    let mut newest: Vec<&Appointment> = appointments.iter().collect();
    newest.sort_by(|a, b| b.id.cmp(&a.id));
    newest.dedup_by_key(|a| a.id);

    newest
        .into_iter()
        .take(window)
        .enumerate()
        .map(|(rank, a)| {
            Notification::new(
                recent_id(a.id),
                NotificationKind::Success,
                "check-circle",
                "New appointment booked",
                format!("{} booked an appointment for {}", a.patient_name, a.specialty),
                now - rules.recent_step * (rank as i32 + 1),
            )
        })
        .collect()
}

fn volume(rules: &RuleSet, count: usize, now: DateTime<Local>) -> Notification {
    Notification::new(
        VOLUME_ID,
        NotificationKind::Info,
        "info-circle",
        "Daily summary",
        format!("There are {count} appointments registered in the system"),
        now - rules.volume_backdate,
    )
}

fn welcome(now: DateTime<Local>) -> Notification {
    Notification::new(
        WELCOME_ID,
        NotificationKind::Info,
        "hand-wave",
        "Welcome to MediCitas!",
        "Book your first medical appointment quickly and easily.",
        now,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).single().unwrap()
    }

    fn appt(id: i64, date: &str, status: &str) -> AppointmentRecord {
        AppointmentRecord {
            id: Some(id),
            patient_name: Some(format!("Patient {id}")),
            patient_document: Some("1234567890".into()),
            health_center: Some("Hospital Central".into()),
            specialty: Some("Cardiología".into()),
            date: Some(date.into()),
            time: Some("10:00".into()),
            reason: Some("Control".into()),
            status: Some(status.into()),
        }
    }

    fn ids(ns: &[Notification]) -> Vec<&str> {
        ns.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn reminder_for_tomorrow_when_active() {
        let rules = RuleSet::for_variant(PortalVariant::Patient);
        let out = derive(&rules, &[appt(4, "2026-03-11", "Pendiente")], now());
        assert_eq!(ids(&out), vec!["cita-4"]);
        assert_eq!(out[0].kind, NotificationKind::Warning);
        assert_eq!(out[0].created_at, now() - Duration::minutes(60));
        assert!(out[0].message.contains("Cardiología"));
    }

    #[test]
    fn no_reminder_for_cancelled_or_other_days() {
        let rules = RuleSet::for_variant(PortalVariant::Patient);
        let snapshot = [
            appt(1, "2026-03-11", "Cancelada"),
            appt(2, "2026-03-11", "Completada"),
            appt(3, "2026-03-10", "Pendiente"),
            appt(5, "2026-03-12", "Pendiente"),
        ];
        assert!(derive(&rules, &snapshot, now()).is_empty());
    }

    #[test]
    fn confirmed_tomorrow_yields_reminder_and_confirmation() {
        let rules = RuleSet::for_variant(PortalVariant::Patient);
        let out = derive(&rules, &[appt(7, "2026-03-11", "Confirmada")], now());
        assert_eq!(ids(&out), vec!["cita-7", "confirmada-7"]);
        assert_eq!(out[1].kind, NotificationKind::Success);
        assert_eq!(out[1].created_at, now() - Duration::minutes(120));
        assert!(out[1].message.contains("11/03/2026"));
    }

    #[test]
    fn admin_reminder_is_backdated_two_hours() {
        let rules = RuleSet::for_variant(PortalVariant::Admin);
        let out = derive(&rules, &[appt(1, "2026-03-11", "Pendiente")], now());
        let reminder = out.iter().find(|n| n.id == "cita-1").unwrap();
        assert_eq!(reminder.created_at, now() - Duration::minutes(120));
        assert!(reminder.message.starts_with("Patient 1 - "));
    }

    #[test]
    fn welcome_only_for_empty_patient_snapshot() {
        let patient = RuleSet::for_variant(PortalVariant::Patient);
        let out = derive(&patient, &[], now());
        assert_eq!(ids(&out), vec![WELCOME_ID]);
        assert_eq!(out[0].created_at, now());
        assert_eq!(out[0].kind, NotificationKind::Info);

        let admin = RuleSet::for_variant(PortalVariant::Admin);
        assert!(derive(&admin, &[], now()).is_empty());

        // a present but malformed entry still means "not empty"
        let out = derive(&patient, &[AppointmentRecord::default()], now());
        assert!(out.is_empty());
    }

    #[test]
    fn recency_ranks_by_id_not_position() {
        let rules = RuleSet::for_variant(PortalVariant::Admin);
        let snapshot = [
            appt(9, "2026-04-01", "Pendiente"),
            appt(2, "2026-04-01", "Pendiente"),
            appt(12, "2026-04-01", "Pendiente"),
            appt(5, "2026-04-01", "Pendiente"),
        ];
        let out = derive(&rules, &snapshot, now());
        assert_eq!(ids(&out), vec!["nueva-12", "nueva-9", "nueva-5"]);
        assert_eq!(out[0].created_at, now() - Duration::minutes(15));
        assert_eq!(out[1].created_at, now() - Duration::minutes(30));
        assert_eq!(out[2].created_at, now() - Duration::minutes(45));
    }

    #[test]
    fn patient_portal_has_no_recency_or_volume() {
        let rules = RuleSet::for_variant(PortalVariant::Patient);
        let snapshot: Vec<_> = (1..=12).map(|i| appt(i, "2026-04-01", "Pendiente")).collect();
        assert!(derive(&rules, &snapshot, now()).is_empty());
    }

    #[test]
    fn volume_summary_above_threshold() {
        let rules = RuleSet::for_variant(PortalVariant::Admin);

        let ten: Vec<_> = (1..=10).map(|i| appt(i, "2026-04-01", "Pendiente")).collect();
        assert!(!ids(&derive(&rules, &ten, now())).contains(&VOLUME_ID));

        let eleven: Vec<_> = (1..=11).map(|i| appt(i, "2026-04-01", "Pendiente")).collect();
        let out = derive(&rules, &eleven, now());
        let summaries: Vec<_> = out.iter().filter(|n| n.id == VOLUME_ID).collect();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].created_at, now() - Duration::minutes(180));
        assert!(summaries[0].message.contains("11"));
    }

    #[test]
    fn malformed_entries_do_not_abort_the_scan() {
        let rules = RuleSet::for_variant(PortalVariant::Patient);
        let mut broken = appt(1, "2026-03-11", "Confirmada");
        broken.specialty = None;
        let snapshot = [broken, appt(2, "2026-03-11", "Pendiente"), appt(3, "mañana", "Pendiente")];
        let out = derive(&rules, &snapshot, now());
        assert_eq!(ids(&out), vec!["cita-2"]);
    }

    #[test]
    fn derivation_is_stable_for_same_snapshot() {
        let rules = RuleSet::for_variant(PortalVariant::Admin);
        let snapshot: Vec<_> = (1..=11).map(|i| appt(i, "2026-03-11", "Confirmada")).collect();
        let first = derive(&rules, &snapshot, now());
        let second = derive(&rules, &snapshot, now() + Duration::minutes(5));
        let strip = |ns: &[Notification]| {
            ns.iter()
                .map(|n| (n.id.clone(), n.kind, n.title.clone(), n.message.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(strip(&first), strip(&second));
    }
}
