// src/portal.rs

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::PortalConfig;
use crate::error::SourceError;
use crate::models::{
    Appointment, AppointmentRecord, AppointmentStatus, ExamRow, NewAppointment, StatisticsResponse,
};
use crate::notifications::{FeedView, NotificationEngine, NotificationKind, PortalVariant};
use crate::source::AppointmentSource;

/* ============================================================
   Renderer seam
   ============================================================ */

/// Display side of the portal. Gets called after every change to the feed.
pub trait Renderer: Send + Sync {
    fn render(&self, feed: &FeedView);
    /// Transient message for the user (failed fetch, rejected command, ...).
    fn alert(&self, message: &str);
    fn appointments(&self, appointments: &[Appointment]);
    /// Plain text blocks: catalogs, dashboards, reports, help.
    fn lines(&self, lines: &[String]);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleRenderer;

impl Renderer for ConsoleRenderer {
    fn render(&self, feed: &FeedView) {
        match feed.badge {
            Some(n) => println!("== Notifications ({n} unread) =="),
            None => println!("== Notifications =="),
        }
        if feed.is_empty() {
            println!("   You have no notifications");
        }
        for item in &feed.items {
            let marker = if item.read { ' ' } else { '*' };
            println!(
                "{marker} [{}] {}: {} ({})  #{}",
                item.kind.as_str(),
                item.title,
                item.message,
                item.age,
                item.id
            );
        }
    }

    fn alert(&self, message: &str) {
        eprintln!("! {message}");
    }

    fn appointments(&self, appointments: &[Appointment]) {
        if appointments.is_empty() {
            println!("   No appointments");
        }
        for a in appointments {
            println!(
                "#{:<4} {} {}  {:<11} {} / {} ({})",
                a.id,
                a.date.format("%Y-%m-%d"),
                a.time,
                a.status.as_str(),
                a.specialty,
                a.health_center,
                a.patient_name
            );
        }
    }

    fn lines(&self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }
}

/* ============================================================
   Dashboard helpers
   ============================================================ */

/// `None` keeps everything.
pub fn filter_by_status(
    appointments: &[Appointment],
    status: Option<AppointmentStatus>,
) -> Vec<&Appointment> {
    appointments
        .iter()
        .filter(|a| status.is_none_or(|s| a.status == s))
        .collect()
}

/// Active appointments from `today` on, soonest first.
pub fn upcoming(appointments: &[Appointment], today: NaiveDate) -> Vec<&Appointment> {
    let mut out: Vec<&Appointment> = appointments
        .iter()
        .filter(|a| a.status.is_active() && a.date >= today)
        .collect();
    out.sort_by(|a, b| (a.date, &a.time).cmp(&(b.date, &b.time)));
    out
}

/// The `n` most recently created, newest first.
pub fn recent(appointments: &[Appointment], n: usize) -> Vec<&Appointment> {
    let mut out: Vec<&Appointment> = appointments.iter().collect();
    out.sort_by(|a, b| b.id.cmp(&a.id));
    out.truncate(n);
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatientSummary {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
}

impl PatientSummary {
    pub fn from_appointments(appointments: &[Appointment]) -> Self {
        Self {
            total: appointments.len(),
            active: appointments.iter().filter(|a| a.status.is_active()).count(),
            completed: appointments
                .iter()
                .filter(|a| a.status == AppointmentStatus::Completed)
                .count(),
        }
    }
}

fn appointment_line(a: &Appointment) -> String {
    format!(
        "  #{} {} {}  {} at {} ({})",
        a.id,
        a.date.format("%d/%m/%Y"),
        a.time,
        a.specialty,
        a.health_center,
        a.status.as_str()
    )
}

/// Patient dashboard: counters, then what is coming up.
pub fn patient_dashboard_lines(appointments: &[Appointment], today: NaiveDate) -> Vec<String> {
    let summary = PatientSummary::from_appointments(appointments);
    let mut out = vec![format!(
        "Appointments: {} total, {} active, {} completed",
        summary.total, summary.active, summary.completed
    )];
    let next = upcoming(appointments, today);
    if next.is_empty() {
        out.push("No upcoming appointments".to_string());
    } else {
        out.push("Upcoming:".to_string());
        out.extend(next.into_iter().map(appointment_line));
    }
    out
}

/// How many recent appointments the administrator dashboard lists.
pub const DASHBOARD_RECENT: usize = 5;

/// Administrator dashboard: headline counts (when the statistics call
/// succeeded) and the latest bookings.
pub fn admin_dashboard_lines(
    stats: Option<&StatisticsResponse>,
    appointments: &[Appointment],
) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(stats) = stats {
        out.push(format!(
            "Appointments: {}  specialties: {}  centers: {}  pending: {}",
            stats.total_citas,
            stats.por_especialidad.len(),
            stats.por_centro.len(),
            stats
                .por_estado
                .get(AppointmentStatus::Pending.as_str())
                .copied()
                .unwrap_or(0)
        ));
    }
    let latest = recent(appointments, DASHBOARD_RECENT);
    if latest.is_empty() {
        out.push("No recent appointments".to_string());
    } else {
        out.push("Recent:".to_string());
        out.extend(
            latest
                .into_iter()
                .map(|a| format!("{} - {}", a.patient_name, appointment_line(a).trim_start())),
        );
    }
    out
}

pub fn statistics_lines(stats: &StatisticsResponse) -> Vec<String> {
    let mut out = vec![format!("Total appointments: {}", stats.total_citas)];
    for (title, counts) in [
        ("By specialty", &stats.por_especialidad),
        ("By health center", &stats.por_centro),
        ("By status", &stats.por_estado),
    ] {
        out.push(format!("{title}:"));
        if counts.is_empty() {
            out.push("  (none)".to_string());
        }
        out.extend(counts.iter().map(|(k, n)| format!("  {k:<24} {n}")));
    }
    out
}

pub fn exam_lines(exams: &[ExamRow]) -> Vec<String> {
    if exams.is_empty() {
        return vec!["No exams on record".to_string()];
    }
    let mut out = vec![format!("Exams: {}", exams.len())];
    for e in exams {
        let mut line = format!(
            "  {} {}: {}",
            e.exam_date.format("%d/%m/%Y"),
            e.exam_type,
            e.result
        );
        if let Some(url) = &e.file_url {
            line.push_str(&format!("  [{url}]"));
        }
        out.push(line);
    }
    out
}

/* ============================================================
   Commands
   ============================================================ */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List(Option<AppointmentStatus>),
    Refresh,
    Read(String),
    ReadAll,
    Cancel(i64),
    Confirm(i64),
    Book(String),
    Centers,
    Specialties,
    Notifications,
    Dashboard,
    Stats,
    /// Patient document; the patient portal uses its own when absent.
    Exams(Option<String>),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  list [status]          appointments, optionally only Pendiente/Confirmada/Completada/Cancelada
  notifications          show the notification feed
  dashboard              summary of your appointments
  stats                  appointment counts by specialty, center and status
  exams [document]       exam results (admin: document required)
  refresh                reload appointments now
  read <id> | read-all   mark notifications as read
  cancel <id>            cancel an appointment
  confirm <id>           confirm an appointment (admin)
  book <fields>          patient: center|specialty|YYYY-MM-DD|HH:MM|reason
                         admin:   patient|phone|center|specialty|YYYY-MM-DD|HH:MM|reason
  centers | specialties  catalogs
  quit";

fn parse_id(arg: &str) -> Result<i64, String> {
    arg.trim()
        .parse::<i64>()
        .map_err(|_| format!("`{}` is not an appointment id", arg.trim()))
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match word {
            "list" | "ls" if rest.is_empty() => Ok(Command::List(None)),
            "list" | "ls" => AppointmentStatus::from_wire(rest)
                .map(|s| Command::List(Some(s)))
                .ok_or_else(|| format!("unknown status `{rest}`")),
            "notifications" | "n" => Ok(Command::Notifications),
            "dashboard" | "d" => Ok(Command::Dashboard),
            "stats" => Ok(Command::Stats),
            "exams" if rest.is_empty() => Ok(Command::Exams(None)),
            "exams" => Ok(Command::Exams(Some(rest.to_string()))),
            "refresh" | "r" => Ok(Command::Refresh),
            "read" if !rest.is_empty() => Ok(Command::Read(rest.to_string())),
            "read" => Err("usage: read <notification id>".into()),
            "read-all" => Ok(Command::ReadAll),
            "cancel" => parse_id(rest).map(Command::Cancel),
            "confirm" => parse_id(rest).map(Command::Confirm),
            "book" if !rest.is_empty() => Ok(Command::Book(rest.to_string())),
            "book" => Err("usage: book <fields separated by |>".into()),
            "centers" => Ok(Command::Centers),
            "specialties" => Ok(Command::Specialties),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            "" => Err("empty command".into()),
            other => Err(format!("unknown command `{other}` (try `help`)")),
        }
    }
}

/// Identity of the signed-in patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientProfile {
    pub document: String,
    pub name: String,
    pub phone: String,
}

impl PatientProfile {
    pub fn from_config(config: &PortalConfig) -> Option<Self> {
        let document = config.patient_id.clone()?;
        Some(Self {
            name: config.patient_name.clone().unwrap_or_else(|| document.clone()),
            phone: config.patient_phone.clone().unwrap_or_default(),
            document,
        })
    }
}

/// Turns `book` arguments into a creation request.
pub fn parse_booking(
    variant: PortalVariant,
    profile: Option<&PatientProfile>,
    args: &str,
) -> Result<NewAppointment, String> {
    let fields: Vec<&str> = args.split('|').map(str::trim).collect();

    let (patient_name, patient_document, phone, rest) = match (variant, profile) {
        (PortalVariant::Patient, Some(p)) if fields.len() == 5 => (
            p.name.clone(),
            Some(p.document.clone()),
            p.phone.clone(),
            &fields[..],
        ),
        (PortalVariant::Patient, None) => return Err("no patient profile configured".into()),
        (PortalVariant::Patient, Some(_)) => {
            return Err("usage: book center|specialty|YYYY-MM-DD|HH:MM|reason".into());
        }
        (PortalVariant::Admin, _) if fields.len() == 7 => (
            fields[0].to_string(),
            None,
            fields[1].to_string(),
            &fields[2..],
        ),
        (PortalVariant::Admin, _) => {
            return Err(
                "usage: book patient|phone|center|specialty|YYYY-MM-DD|HH:MM|reason".into(),
            );
        }
    };

    let date = NaiveDate::parse_from_str(rest[2], "%Y-%m-%d")
        .map_err(|_| format!("`{}` is not a YYYY-MM-DD date", rest[2]))?;

    Ok(NewAppointment {
        patient_name,
        patient_document,
        phone,
        health_center: rest[0].to_string(),
        specialty: rest[1].to_string(),
        date,
        time: rest[3].to_string(),
        reason: rest[4].to_string(),
        status: AppointmentStatus::Pending,
    })
}

/* ============================================================
   Portal session
   ============================================================ */

pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

/// Whether the command loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// One signed-in portal session: the latest snapshot plus the notification
/// feed derived from it.
pub struct Portal<S: AppointmentSource> {
    source: S,
    variant: PortalVariant,
    profile: Option<PatientProfile>,
    engine: NotificationEngine,
    snapshot: Vec<AppointmentRecord>,
    renderer: Arc<dyn Renderer>,
    clock: Clock,
}

impl<S: AppointmentSource> Portal<S> {
    pub fn new(
        source: S,
        variant: PortalVariant,
        profile: Option<PatientProfile>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self::with_clock(source, variant, profile, renderer, Arc::new(Local::now))
    }

    pub fn with_clock(
        source: S,
        variant: PortalVariant,
        profile: Option<PatientProfile>,
        renderer: Arc<dyn Renderer>,
        clock: Clock,
    ) -> Self {
        let mut engine = NotificationEngine::new(variant);
        let on_change = Arc::clone(&renderer);
        let now = Arc::clone(&clock);
        engine.subscribe(move |_event, list| on_change.render(&FeedView::build(list, now())));

        Self {
            source,
            variant,
            profile,
            engine,
            snapshot: Vec::new(),
            renderer,
            clock,
        }
    }

    pub fn variant(&self) -> PortalVariant {
        self.variant
    }

    pub fn engine(&self) -> &NotificationEngine {
        &self.engine
    }

    pub fn snapshot(&self) -> &[AppointmentRecord] {
        &self.snapshot
    }

    /// Valid appointments of the current snapshot.
    pub fn appointments(&self) -> Vec<Appointment> {
        self.snapshot
            .iter()
            .filter_map(|r| Appointment::try_from(r).ok())
            .collect()
    }

    fn now(&self) -> DateTime<Local> {
        (self.clock)()
    }

    fn owner(&self) -> Option<&str> {
        match self.variant {
            PortalVariant::Patient => self.profile.as_ref().map(|p| p.document.as_str()),
            PortalVariant::Admin => None,
        }
    }

    /// Pulls a fresh snapshot and merges what it implies into the feed.
    /// A failed fetch keeps the previous snapshot and every notification.
    pub async fn refresh(&mut self) -> Result<usize, SourceError> {
        let snapshot = match self.source.get_appointments(self.owner()).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("appointment refresh failed: {e}");
                self.renderer
                    .alert("Could not reach the server; showing the last loaded appointments");
                return Err(e);
            }
        };

        self.snapshot = snapshot;
        let now = self.now();
        Ok(self.engine.refresh(&self.snapshot, now))
    }

    /// Refresh whose failure has already been reported to the user.
    async fn refresh_quietly(&mut self) {
        if let Err(e) = self.refresh().await {
            tracing::debug!("follow-up refresh skipped: {e}");
        }
    }

    /// Books an appointment. Only a successful booking adds a notification.
    pub async fn submit(&mut self, appointment: NewAppointment) -> Result<i64, SourceError> {
        let id = match self.source.create_appointment(&appointment).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("booking failed: {e}");
                self.renderer.alert("Could not book the appointment");
                return Err(e);
            }
        };
        tracing::info!(appointment_id = id, "appointment booked");

        let message = match self.variant {
            PortalVariant::Patient => format!(
                "Your {} appointment at {} has been registered",
                appointment.specialty, appointment.health_center
            ),
            PortalVariant::Admin => format!(
                "{} booked an appointment for {}",
                appointment.patient_name, appointment.specialty
            ),
        };
        let now = self.now();
        self.engine.record_own_submission(
            NotificationKind::Success,
            "calendar-check",
            "Appointment booked",
            message,
            now,
        );

        self.refresh_quietly().await;
        Ok(id)
    }

    pub async fn cancel(&mut self, id: i64) -> Result<(), SourceError> {
        if let Err(e) = self.source.cancel_appointment(id).await {
            tracing::warn!(appointment_id = id, "cancel failed: {e}");
            self.renderer.alert("Could not cancel the appointment");
            return Err(e);
        }
        tracing::info!(appointment_id = id, "appointment cancelled");

        self.refresh_quietly().await;
        Ok(())
    }

    /// Administrator only.
    pub async fn confirm(&mut self, id: i64) -> Result<(), SourceError> {
        if self.variant != PortalVariant::Admin {
            self.renderer.alert("Only administrators can confirm appointments");
            return Err(SourceError::Unsupported("confirming appointments"));
        }
        if let Err(e) = self.source.confirm_appointment(id).await {
            tracing::warn!(appointment_id = id, "confirm failed: {e}");
            self.renderer.alert("Could not confirm the appointment");
            return Err(e);
        }
        tracing::info!(appointment_id = id, "appointment confirmed");

        let now = self.now();
        self.engine.record_own_submission(
            NotificationKind::Success,
            "check-circle",
            "Appointment confirmed",
            "The appointment has been confirmed and the patient will be notified",
            now,
        );

        self.refresh_quietly().await;
        Ok(())
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Renders the variant's dashboard from the current snapshot. The
    /// administrator's headline counts come from the statistics endpoint.
    pub async fn dashboard(&self) {
        let appointments = self.appointments();
        let lines = match self.variant {
            PortalVariant::Patient => patient_dashboard_lines(&appointments, self.today()),
            PortalVariant::Admin => {
                let stats = match self.source.statistics(None).await {
                    Ok(stats) => Some(stats),
                    Err(e) => {
                        tracing::warn!("loading statistics failed: {e}");
                        self.renderer.alert("Could not load statistics");
                        None
                    }
                };
                admin_dashboard_lines(stats.as_ref(), &appointments)
            }
        };
        self.renderer.lines(&lines);
    }

    pub async fn statistics(&self) -> Result<StatisticsResponse, SourceError> {
        match self.source.statistics(self.owner()).await {
            Ok(stats) => {
                self.renderer.lines(&statistics_lines(&stats));
                Ok(stats)
            }
            Err(e) => {
                tracing::warn!("loading statistics failed: {e}");
                self.renderer.alert("Could not load statistics");
                Err(e)
            }
        }
    }

    /// Exams for `document`, or for the signed-in patient when `None`.
    pub async fn exams(&self, document: Option<&str>) -> Result<Vec<ExamRow>, SourceError> {
        let Some(document) = document.or(self.owner()) else {
            self.renderer.alert("usage: exams <patient document>");
            return Err(SourceError::Unsupported("listing exams without a patient document"));
        };
        match self.source.exams(document).await {
            Ok(exams) => {
                self.renderer.lines(&exam_lines(&exams));
                Ok(exams)
            }
            Err(e) => {
                tracing::warn!("loading exams failed: {e}");
                self.renderer.alert("Could not load exams");
                Err(e)
            }
        }
    }

    fn catalog(&self, what: &str, list: Result<Vec<String>, SourceError>) {
        match list {
            Ok(list) => self.renderer.lines(&list),
            Err(e) => {
                tracing::warn!("loading {what} failed: {e}");
                self.renderer.alert(&format!("Could not load {what}"));
            }
        }
    }

    pub fn mark_read(&mut self, id: &str) -> bool {
        self.engine.mark_read(id)
    }

    pub fn mark_all_read(&mut self) {
        self.engine.mark_all_read();
    }

    /// Re-renders age strings only; nothing is re-derived.
    pub fn tick_ages(&self) {
        self.renderer.render(&self.engine.feed_view(self.now()));
    }

    /// Runs one command. The command is passed in explicitly by whoever read
    /// it; failures are reported through the renderer.
    pub async fn handle(&mut self, command: Command) -> Flow {
        match command {
            Command::List(status) => {
                let all = self.appointments();
                let shown: Vec<Appointment> =
                    filter_by_status(&all, status).into_iter().cloned().collect();
                self.renderer.appointments(&shown);
            }
            Command::Notifications => self.tick_ages(),
            Command::Refresh => self.refresh_quietly().await,
            Command::Read(id) => {
                if !self.mark_read(&id) {
                    self.renderer.alert(&format!("no notification `{id}`"));
                }
            }
            Command::ReadAll => self.mark_all_read(),
            Command::Cancel(id) => {
                if let Err(e) = self.cancel(id).await {
                    tracing::debug!(appointment_id = id, "cancel command failed: {e}");
                }
            }
            Command::Confirm(id) => {
                if let Err(e) = self.confirm(id).await {
                    tracing::debug!(appointment_id = id, "confirm command failed: {e}");
                }
            }
            Command::Book(args) => {
                match parse_booking(self.variant, self.profile.as_ref(), &args) {
                    Ok(req) => {
                        if let Err(e) = self.submit(req).await {
                            tracing::debug!("book command failed: {e}");
                        }
                    }
                    Err(msg) => self.renderer.alert(&msg),
                }
            }
            Command::Dashboard => self.dashboard().await,
            Command::Stats => {
                if let Err(e) = self.statistics().await {
                    tracing::debug!("stats command failed: {e}");
                }
            }
            Command::Exams(document) => {
                if let Err(e) = self.exams(document.as_deref()).await {
                    tracing::debug!("exams command failed: {e}");
                }
            }
            Command::Centers => {
                let list = self.source.health_centers().await;
                self.catalog("health centers", list);
            }
            Command::Specialties => {
                let list = self.source.specialties().await;
                self.catalog("specialties", list);
            }
            Command::Help => {
                let help: Vec<String> = HELP.lines().map(str::to_string).collect();
                self.renderer.lines(&help);
            }
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }
}

fn interval_every(period: Duration) -> Interval {
    let mut i = tokio::time::interval_at(Instant::now() + period, period);
    i.set_missed_tick_behavior(MissedTickBehavior::Skip);
    i
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Drives a portal until `quit` or Ctrl-C: snapshot refresh timer (when
/// enabled), age refresh timer, and commands from stdin.
pub async fn run<S: AppointmentSource>(
    mut portal: Portal<S>,
    config: &PortalConfig,
) -> anyhow::Result<()> {
    portal.refresh_quietly().await;

    let mut refresh = config.refresh_every.map(interval_every);
    let mut ages = interval_every(config.age_refresh_every);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tick(&mut refresh) => portal.refresh_quietly().await,
            _ = ages.tick() => portal.tick_ages(),
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match line.parse::<Command>() {
                    Ok(cmd) => {
                        if portal.handle(cmd).await == Flow::Quit {
                            break;
                        }
                    }
                    Err(msg) => portal.renderer.alert(&msg),
                },
                None => {
                    tracing::info!("stdin closed; running on timers only");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("portal session ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeState {
        appointments: Vec<AppointmentRecord>,
        fail_fetch: bool,
        fail_create: bool,
        fetched_with: Vec<Option<String>>,
        confirmed: Vec<i64>,
        exams: Vec<ExamRow>,
        stats_for: Vec<Option<String>>,
        fail_stats: bool,
    }

    #[derive(Clone, Default)]
    struct FakeSource(Arc<Mutex<FakeState>>);

    fn unavailable() -> SourceError {
        SourceError::Status {
            status: 503,
            code: "HTTP".into(),
            message: "unavailable".into(),
        }
    }

    #[async_trait]
    impl AppointmentSource for FakeSource {
        async fn get_appointments(
            &self,
            owner: Option<&str>,
        ) -> Result<Vec<AppointmentRecord>, SourceError> {
            let mut s = self.0.lock().unwrap();
            s.fetched_with.push(owner.map(str::to_string));
            if s.fail_fetch {
                return Err(unavailable());
            }
            Ok(s.appointments.clone())
        }

        async fn create_appointment(&self, a: &NewAppointment) -> Result<i64, SourceError> {
            let mut s = self.0.lock().unwrap();
            if s.fail_create {
                return Err(unavailable());
            }
            let id = s.appointments.len() as i64 + 1;
            s.appointments.push(AppointmentRecord {
                id: Some(id),
                patient_name: Some(a.patient_name.clone()),
                patient_document: a.patient_document.clone(),
                health_center: Some(a.health_center.clone()),
                specialty: Some(a.specialty.clone()),
                date: Some(a.date.format("%Y-%m-%d").to_string()),
                time: Some(a.time.clone()),
                reason: Some(a.reason.clone()),
                status: Some(a.status.as_str().to_string()),
            });
            Ok(id)
        }

        async fn cancel_appointment(&self, id: i64) -> Result<(), SourceError> {
            self.set_status(id, AppointmentStatus::Cancelled)
        }

        async fn confirm_appointment(&self, id: i64) -> Result<(), SourceError> {
            self.0.lock().unwrap().confirmed.push(id);
            self.set_status(id, AppointmentStatus::Confirmed)
        }

        async fn health_centers(&self) -> Result<Vec<String>, SourceError> {
            Ok(vec!["Hospital Central".into()])
        }

        async fn specialties(&self) -> Result<Vec<String>, SourceError> {
            Ok(vec!["Pediatría".into()])
        }

        async fn statistics(
            &self,
            owner: Option<&str>,
        ) -> Result<StatisticsResponse, SourceError> {
            let mut s = self.0.lock().unwrap();
            s.stats_for.push(owner.map(str::to_string));
            if s.fail_stats {
                return Err(unavailable());
            }
            let mut stats = StatisticsResponse {
                total_citas: s.appointments.len(),
                ..Default::default()
            };
            for a in &s.appointments {
                let key = |v: &Option<String>| v.clone().unwrap_or_default();
                *stats.por_especialidad.entry(key(&a.specialty)).or_default() += 1;
                *stats.por_centro.entry(key(&a.health_center)).or_default() += 1;
                *stats.por_estado.entry(key(&a.status)).or_default() += 1;
            }
            Ok(stats)
        }

        async fn exams(&self, document: &str) -> Result<Vec<ExamRow>, SourceError> {
            let s = self.0.lock().unwrap();
            Ok(s.exams
                .iter()
                .filter(|e| e.patient_document == document)
                .cloned()
                .collect())
        }
    }

    impl FakeSource {
        fn set_status(&self, id: i64, status: AppointmentStatus) -> Result<(), SourceError> {
            let mut s = self.0.lock().unwrap();
            match s.appointments.iter_mut().find(|a| a.id == Some(id)) {
                Some(a) => {
                    a.status = Some(status.as_str().to_string());
                    Ok(())
                }
                None => Err(SourceError::from_status(404, "")),
            }
        }
    }

    #[derive(Default)]
    struct RecordingRenderer {
        feeds: Mutex<Vec<FeedView>>,
        alerts: Mutex<Vec<String>>,
        listed: Mutex<Vec<Vec<i64>>>,
        printed: Mutex<Vec<String>>,
    }

    impl Renderer for RecordingRenderer {
        fn render(&self, feed: &FeedView) {
            self.feeds.lock().unwrap().push(feed.clone());
        }
        fn alert(&self, message: &str) {
            self.alerts.lock().unwrap().push(message.to_string());
        }
        fn appointments(&self, appointments: &[Appointment]) {
            self.listed
                .lock()
                .unwrap()
                .push(appointments.iter().map(|a| a.id).collect());
        }
        fn lines(&self, lines: &[String]) {
            self.printed.lock().unwrap().extend_from_slice(lines);
        }
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).single().unwrap()
    }

    fn profile() -> PatientProfile {
        PatientProfile {
            document: "1234567890".into(),
            name: "Juan Pérez".into(),
            phone: "3009876543".into(),
        }
    }

    fn portal(
        variant: PortalVariant,
        source: &FakeSource,
        renderer: &Arc<RecordingRenderer>,
    ) -> Portal<FakeSource> {
        let profile = (variant == PortalVariant::Patient).then(profile);
        let renderer: Arc<dyn Renderer> = renderer.clone();
        Portal::with_clock(source.clone(), variant, profile, renderer, Arc::new(now))
    }

    fn record(id: i64, date: &str, status: AppointmentStatus) -> AppointmentRecord {
        AppointmentRecord {
            id: Some(id),
            patient_name: Some("Juan Pérez".into()),
            patient_document: Some("1234567890".into()),
            health_center: Some("Hospital Central".into()),
            specialty: Some("Pediatría".into()),
            date: Some(date.into()),
            time: Some("09:00".into()),
            reason: Some("Control".into()),
            status: Some(status.as_str().into()),
        }
    }

    fn booking() -> NewAppointment {
        parse_booking(
            PortalVariant::Patient,
            Some(&profile()),
            "Hospital Central|Pediatría|2026-03-20|10:30|Fiebre",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn patient_refresh_filters_by_owner_and_renders() {
        let source = FakeSource::default();
        let renderer = Arc::new(RecordingRenderer::default());
        let mut p = portal(PortalVariant::Patient, &source, &renderer);

        assert_eq!(p.refresh().await.unwrap(), 1);
        assert_eq!(
            source.0.lock().unwrap().fetched_with,
            vec![Some("1234567890".to_string())]
        );
        assert_eq!(p.engine().visible()[0].id, "welcome");

        let feeds = renderer.feeds.lock().unwrap();
        assert_eq!(feeds.last().unwrap().badge, Some(1));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_feed_and_snapshot() {
        let source = FakeSource::default();
        source.0.lock().unwrap().appointments =
            vec![record(7, "2026-03-11", AppointmentStatus::Confirmed)];
        let renderer = Arc::new(RecordingRenderer::default());
        let mut p = portal(PortalVariant::Patient, &source, &renderer);

        p.refresh().await.unwrap();
        p.mark_read("cita-7");
        let before: Vec<_> = p.engine().visible().to_vec();

        source.0.lock().unwrap().fail_fetch = true;
        assert!(p.refresh().await.is_err());

        assert_eq!(p.engine().visible(), &before[..]);
        assert_eq!(p.snapshot().len(), 1);
        assert_eq!(renderer.alerts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn successful_booking_adds_own_notification() {
        let source = FakeSource::default();
        let renderer = Arc::new(RecordingRenderer::default());
        let mut p = portal(PortalVariant::Patient, &source, &renderer);

        let id = p.submit(booking()).await.unwrap();
        assert_eq!(id, 1);

        let own: Vec<_> = p
            .engine()
            .visible()
            .iter()
            .filter(|n| n.id.starts_with("notif-"))
            .collect();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].title, "Appointment booked");
        assert!(own[0].message.contains("Pediatría"));
        // follow-up refresh saw the new appointment, so no welcome entry
        assert!(!p.engine().contains("welcome"));
        assert_eq!(p.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn failed_booking_adds_nothing() {
        let source = FakeSource::default();
        source.0.lock().unwrap().fail_create = true;
        let renderer = Arc::new(RecordingRenderer::default());
        let mut p = portal(PortalVariant::Patient, &source, &renderer);

        assert!(p.submit(booking()).await.is_err());
        assert!(p.engine().is_empty());
        assert_eq!(
            *renderer.alerts.lock().unwrap(),
            vec!["Could not book the appointment".to_string()]
        );
    }

    #[tokio::test]
    async fn patients_cannot_confirm() {
        let source = FakeSource::default();
        source.0.lock().unwrap().appointments =
            vec![record(1, "2026-04-01", AppointmentStatus::Pending)];
        let renderer = Arc::new(RecordingRenderer::default());
        let mut p = portal(PortalVariant::Patient, &source, &renderer);

        assert!(matches!(p.confirm(1).await, Err(SourceError::Unsupported(_))));
        assert!(source.0.lock().unwrap().confirmed.is_empty());
    }

    #[tokio::test]
    async fn admin_confirm_records_and_rederives() {
        let source = FakeSource::default();
        source.0.lock().unwrap().appointments =
            vec![record(1, "2026-04-01", AppointmentStatus::Pending)];
        let renderer = Arc::new(RecordingRenderer::default());
        let mut p = portal(PortalVariant::Admin, &source, &renderer);

        p.refresh().await.unwrap();
        assert_eq!(source.0.lock().unwrap().fetched_with, vec![None]);
        p.confirm(1).await.unwrap();

        let engine = p.engine();
        assert!(engine.contains("confirmada-1"));
        assert!(engine.contains("nueva-1"));
        assert!(
            engine
                .visible()
                .iter()
                .any(|n| n.id.starts_with("notif-") && n.title == "Appointment confirmed")
        );
    }

    #[tokio::test]
    async fn cancel_then_refresh_drops_nothing() {
        let source = FakeSource::default();
        source.0.lock().unwrap().appointments =
            vec![record(2, "2026-03-11", AppointmentStatus::Pending)];
        let renderer = Arc::new(RecordingRenderer::default());
        let mut p = portal(PortalVariant::Patient, &source, &renderer);

        p.refresh().await.unwrap();
        assert!(p.engine().contains("cita-2"));
        p.cancel(2).await.unwrap();

        assert!(p.engine().contains("cita-2"));
        assert_eq!(p.appointments()[0].status, AppointmentStatus::Cancelled);
    }

    #[tokio::test]
    async fn commands_drive_the_session() {
        let source = FakeSource::default();
        source.0.lock().unwrap().appointments = vec![
            record(1, "2026-03-11", AppointmentStatus::Confirmed),
            record(2, "2026-05-01", AppointmentStatus::Completed),
        ];
        let renderer = Arc::new(RecordingRenderer::default());
        let mut p = portal(PortalVariant::Patient, &source, &renderer);

        assert_eq!(p.handle(Command::Refresh).await, Flow::Continue);
        assert_eq!(p.engine().unread_count(), 2);

        p.handle("read cita-1".parse().unwrap()).await;
        assert_eq!(p.engine().unread_count(), 1);
        p.handle(Command::Read("ghost".into())).await;
        assert_eq!(renderer.alerts.lock().unwrap().len(), 1);

        p.handle("list Completada".parse().unwrap()).await;
        assert_eq!(*renderer.listed.lock().unwrap(), vec![vec![2]]);

        p.handle(Command::ReadAll).await;
        assert_eq!(p.engine().badge(), None);
        assert_eq!(p.handle(Command::Quit).await, Flow::Quit);
    }

    fn exam(document: &str, kind: &str) -> ExamRow {
        ExamRow {
            exam_id: 1,
            patient_document: document.into(),
            exam_type: kind.into(),
            exam_date: NaiveDate::from_ymd_opt(2026, 2, 20).unwrap(),
            result: "Normal".into(),
            file_url: None,
        }
    }

    #[tokio::test]
    async fn patient_dashboard_shows_summary_and_upcoming() {
        let source = FakeSource::default();
        source.0.lock().unwrap().appointments = vec![
            record(1, "2026-03-09", AppointmentStatus::Pending),
            record(2, "2026-03-12", AppointmentStatus::Confirmed),
            record(3, "2026-03-01", AppointmentStatus::Completed),
        ];
        let renderer = Arc::new(RecordingRenderer::default());
        let mut p = portal(PortalVariant::Patient, &source, &renderer);
        p.refresh().await.unwrap();

        p.handle("dashboard".parse().unwrap()).await;

        let printed = renderer.printed.lock().unwrap();
        assert_eq!(printed[0], "Appointments: 3 total, 2 active, 1 completed");
        assert_eq!(printed[1], "Upcoming:");
        assert_eq!(printed.len(), 3);
        assert!(printed[2].starts_with("  #2 12/03/2026"));
        assert!(source.0.lock().unwrap().stats_for.is_empty());
    }

    #[tokio::test]
    async fn admin_dashboard_lists_latest_five_with_counts() {
        let source = FakeSource::default();
        source.0.lock().unwrap().appointments = (1..=7)
            .map(|id| record(id, "2026-04-01", AppointmentStatus::Pending))
            .collect();
        let renderer = Arc::new(RecordingRenderer::default());
        let mut p = portal(PortalVariant::Admin, &source, &renderer);
        p.refresh().await.unwrap();

        p.handle(Command::Dashboard).await;

        let printed = renderer.printed.lock().unwrap();
        assert_eq!(
            printed[0],
            "Appointments: 7  specialties: 1  centers: 1  pending: 7"
        );
        assert_eq!(printed[1], "Recent:");
        assert_eq!(printed.len(), 2 + DASHBOARD_RECENT);
        assert!(printed[2].starts_with("Juan Pérez - #7 "));
        assert!(printed[6].starts_with("Juan Pérez - #3 "));
    }

    #[tokio::test]
    async fn admin_dashboard_survives_statistics_failure() {
        let source = FakeSource::default();
        source.0.lock().unwrap().fail_stats = true;
        let renderer = Arc::new(RecordingRenderer::default());
        let mut p = portal(PortalVariant::Admin, &source, &renderer);

        p.handle(Command::Dashboard).await;

        assert_eq!(
            *renderer.printed.lock().unwrap(),
            vec!["No recent appointments".to_string()]
        );
        assert_eq!(
            *renderer.alerts.lock().unwrap(),
            vec!["Could not load statistics".to_string()]
        );
    }

    #[tokio::test]
    async fn stats_are_owner_filtered_for_patients() {
        let source = FakeSource::default();
        source.0.lock().unwrap().appointments =
            vec![record(1, "2026-04-01", AppointmentStatus::Pending)];
        let renderer = Arc::new(RecordingRenderer::default());
        let mut p = portal(PortalVariant::Patient, &source, &renderer);

        p.handle("stats".parse().unwrap()).await;

        assert_eq!(
            source.0.lock().unwrap().stats_for,
            vec![Some("1234567890".to_string())]
        );
        let printed = renderer.printed.lock().unwrap();
        assert_eq!(printed[0], "Total appointments: 1");
        assert!(printed.iter().any(|l| l.trim_start().starts_with("Pediatría")));
        assert!(printed.iter().any(|l| l.trim_start().starts_with("Pendiente")));
    }

    #[tokio::test]
    async fn exams_default_to_own_document() {
        let source = FakeSource::default();
        source.0.lock().unwrap().exams = vec![
            exam("1234567890", "Hemograma"),
            exam("999", "Rayos X"),
        ];
        let renderer = Arc::new(RecordingRenderer::default());
        let mut p = portal(PortalVariant::Patient, &source, &renderer);

        p.handle("exams".parse().unwrap()).await;

        assert_eq!(
            *renderer.printed.lock().unwrap(),
            vec![
                "Exams: 1".to_string(),
                "  20/02/2026 Hemograma: Normal".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn admin_exams_need_a_document() {
        let source = FakeSource::default();
        source.0.lock().unwrap().exams = vec![exam("999", "Rayos X")];
        let renderer = Arc::new(RecordingRenderer::default());
        let p = portal(PortalVariant::Admin, &source, &renderer);

        assert!(matches!(p.exams(None).await, Err(SourceError::Unsupported(_))));
        assert_eq!(renderer.alerts.lock().unwrap().len(), 1);

        let found = p.exams(Some("999")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(renderer.printed.lock().unwrap()[1], "  20/02/2026 Rayos X: Normal");

        assert_eq!(p.exams(Some("000")).await.unwrap(), vec![]);
        assert_eq!(
            renderer.printed.lock().unwrap().last().unwrap(),
            "No exams on record"
        );
    }

    #[tokio::test]
    async fn catalogs_and_help_go_through_renderer() {
        let source = FakeSource::default();
        let renderer = Arc::new(RecordingRenderer::default());
        let mut p = portal(PortalVariant::Patient, &source, &renderer);

        p.handle(Command::Centers).await;
        p.handle(Command::Specialties).await;
        assert_eq!(
            *renderer.printed.lock().unwrap(),
            vec!["Hospital Central".to_string(), "Pediatría".to_string()]
        );

        p.handle(Command::Help).await;
        let printed = renderer.printed.lock().unwrap();
        assert_eq!(printed[2], "commands:");
        assert!(printed.iter().any(|l| l.trim_start().starts_with("dashboard")));
    }

    #[test]
    fn statistics_lines_mark_empty_groups() {
        let lines = statistics_lines(&StatisticsResponse::default());
        assert_eq!(
            lines,
            vec![
                "Total appointments: 0",
                "By specialty:",
                "  (none)",
                "By health center:",
                "  (none)",
                "By status:",
                "  (none)",
            ]
        );
    }

    #[test]
    fn command_parsing() {
        assert_eq!("list".parse::<Command>(), Ok(Command::List(None)));
        assert_eq!(
            "list Pendiente".parse::<Command>(),
            Ok(Command::List(Some(AppointmentStatus::Pending)))
        );
        assert_eq!("cancel 12".parse::<Command>(), Ok(Command::Cancel(12)));
        assert_eq!("  confirm 3 ".parse::<Command>(), Ok(Command::Confirm(3)));
        assert_eq!("read-all".parse::<Command>(), Ok(Command::ReadAll));
        assert_eq!("dashboard".parse::<Command>(), Ok(Command::Dashboard));
        assert_eq!("stats".parse::<Command>(), Ok(Command::Stats));
        assert_eq!("exams".parse::<Command>(), Ok(Command::Exams(None)));
        assert_eq!(
            "exams 999".parse::<Command>(),
            Ok(Command::Exams(Some("999".into())))
        );
        assert!("cancel twelve".parse::<Command>().is_err());
        assert!("read".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
    }

    #[test]
    fn booking_fields_per_variant() {
        let b = booking();
        assert_eq!(b.patient_name, "Juan Pérez");
        assert_eq!(b.patient_document.as_deref(), Some("1234567890"));
        assert_eq!(b.time, "10:30");
        assert_eq!(b.status, AppointmentStatus::Pending);

        let a = parse_booking(
            PortalVariant::Admin,
            None,
            "María López|3001112233|Clínica del Norte|Cardiología|2026-04-02|08:00|Chequeo",
        )
        .unwrap();
        assert_eq!(a.patient_name, "María López");
        assert_eq!(a.health_center, "Clínica del Norte");
        assert_eq!(a.patient_document, None);

        assert!(parse_booking(PortalVariant::Patient, Some(&profile()), "a|b|c").is_err());
        assert!(
            parse_booking(
                PortalVariant::Patient,
                Some(&profile()),
                "Hospital Central|Pediatría|20/03/2026|10:30|Fiebre"
            )
            .is_err()
        );
    }

    #[test]
    fn dashboard_helpers() {
        let appts: Vec<Appointment> = [
            record(1, "2026-03-09", AppointmentStatus::Pending),
            record(2, "2026-03-12", AppointmentStatus::Confirmed),
            record(3, "2026-03-11", AppointmentStatus::Pending),
            record(4, "2026-03-15", AppointmentStatus::Cancelled),
            record(5, "2026-03-01", AppointmentStatus::Completed),
        ]
        .iter()
        .map(|r| Appointment::try_from(r).unwrap())
        .collect();

        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let ids = |v: Vec<&Appointment>| v.iter().map(|a| a.id).collect::<Vec<_>>();

        assert_eq!(ids(upcoming(&appts, today)), vec![3, 2]);
        assert_eq!(ids(recent(&appts, 2)), vec![5, 4]);
        assert_eq!(
            ids(filter_by_status(&appts, Some(AppointmentStatus::Pending))),
            vec![1, 3]
        );
        assert_eq!(filter_by_status(&appts, None).len(), 5);
        assert_eq!(
            PatientSummary::from_appointments(&appts),
            PatientSummary {
                total: 5,
                active: 3,
                completed: 1
            }
        );
    }
}
