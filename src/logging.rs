use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize structured logging. Call once, at process startup.
pub fn init_logging(debug: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("decentralis_core=debug")
        } else {
            EnvFilter::new("decentralis_core=info")
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    info!("decentralis logging initialized");
    Ok(())
}

/// Initialize logging, falling back to stderr if the subscriber is already set.
pub fn init_logging_safe(debug: bool) {
    if let Err(e) = init_logging(debug) {
        eprintln!("warning: failed to initialize structured logging: {e}");
    }
}

pub fn log_chunk_event(event: &str, details: &str) {
    info!(target: "decentralis::chunk", "{event}: {details}");
}

pub fn log_network_event(event: &str, details: &str) {
    info!(target: "decentralis::network", "{event}: {details}");
}

pub fn log_replication_event(event: &str, details: &str) {
    info!(target: "decentralis::replication", "{event}: {details}");
}
