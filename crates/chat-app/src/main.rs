use std::process::ExitCode;

use gigi::app::App;
use gigi::settings::SettingsStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so the conversation on stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();
    let settings_path = settings_store.config_path().display().to_string();

    let app = match App::new(&settings, &settings_path) {
        Ok(app) => app,
        Err(error) => {
            eprintln!("gigi: {error}");
            return ExitCode::FAILURE;
        }
    };

    match app.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("gigi: {error}");
            ExitCode::FAILURE
        }
    }
}
