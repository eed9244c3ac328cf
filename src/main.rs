use std::process::ExitCode;

use pdf_chat_lib::config::AppConfig;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            eprintln!("Configuration error: {e}. Set it in the environment or a .env file.");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = pdf_chat_lib::run(config).await {
        error!("Server error: {e:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
