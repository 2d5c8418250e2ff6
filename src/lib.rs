pub mod analytics;
pub mod cache;
pub mod client;
pub mod error;
pub mod model;
pub mod refresh;
pub mod report;
pub mod settings;

/// Installs the `tracing` subscriber shared by both binaries.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("todoist_analytics=info")),
        )
        .try_init();
}
