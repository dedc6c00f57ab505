use std::process::ExitCode;

use common::telemetry::{get_tracing_subscriber, init_tracing_subscriber};
use normalization_worker::{configuration::get_configuration, startup::Application};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let tracing_subscriber = get_tracing_subscriber(
        "normalization_worker".into(),
        "info".into(),
        std::io::stdout,
    );
    if let Err(error) = init_tracing_subscriber(tracing_subscriber) {
        eprintln!("Failed to initialize tracing: {:?}", error);
        return ExitCode::FAILURE;
    }

    let configuration = match get_configuration() {
        Ok(configuration) => configuration,
        Err(error) => {
            eprintln!("Invalid configuration: {}", error);
            return ExitCode::FAILURE;
        }
    };

    let application = match Application::build(configuration).await {
        Ok(application) => application,
        Err(error) => {
            error!(?error, "Failed to build application");
            return ExitCode::FAILURE;
        }
    };

    // Stops consuming on Ctrl-C, the job being handled is finished first
    let cancel_token = CancellationToken::new();
    let cloned_cancel_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            cloned_cancel_token.cancel();
        }
    });

    if let Err(error) = application.run_until_stopped(cancel_token).await {
        error!(?error, "Application stopped with an error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
