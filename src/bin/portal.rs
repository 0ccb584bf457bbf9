use std::sync::Arc;

use medicitas::config::PortalConfig;
use medicitas::portal::{self, ConsoleRenderer, PatientProfile, Portal, HELP};
use medicitas::source::HttpAppointmentSource;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // stdout belongs to the feed, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cfg = PortalConfig::from_env()?;
    tracing::info!(api = %cfg.api_url, variant = ?cfg.variant, "starting portal");

    let source = HttpAppointmentSource::new(cfg.api_url.clone());
    let profile = PatientProfile::from_config(&cfg);
    let portal = Portal::new(source, cfg.variant, profile, Arc::new(ConsoleRenderer));

    println!("{HELP}\n");
    portal::run(portal, &cfg).await
}
