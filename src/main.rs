use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match cli::run() {
        cli::RunOutcome::Serve(config) => config,
        cli::RunOutcome::Exit(code) => std::process::exit(code),
    };

    if let Err(err) = dosecall::serve(config).await {
        tracing::error!(error = %err, "dosecall failed");
        let code = match err {
            dosecall::error::ServeError::Config(_) => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}
