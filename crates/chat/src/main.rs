use std::process::ExitCode;

use ragchat::console;
use ragchat::settings::SettingsStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so they never interleave with streamed replies on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let settings = SettingsStore::load();
    tracing::debug!(path = %settings.config_path().display(), "loaded settings");

    match console::run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "ragchat exited with an error");
            ExitCode::FAILURE
        }
    }
}
