use anyhow::{Context, Result};
use artifact_harness::report::Configuration;
use artifact_harness::{Args, Runner, ServiceClient};
use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let configuration = Configuration {
        ingest_url: args.ingest_url.clone(),
        process_url: args.process_url().to_string(),
    };
    info!(
        ingest_url = %configuration.ingest_url,
        process_url = %configuration.process_url,
        "Starting verification run"
    );

    let client = ServiceClient::new(
        &configuration.ingest_url,
        &configuration.process_url,
        Duration::from_secs(args.timeout_secs),
    )
    .context("Failed to create HTTP client")?;

    let results = Runner::new(client, args.settings()).run(configuration).await;
    results.write(&args.output, &args.summary).await?;

    println!("{}", results.render_text());
    info!(
        output = %args.output.display(),
        summary = %args.summary.display(),
        "Results written"
    );

    if results.succeeded() {
        info!("Verification completed successfully");
        Ok(ExitCode::SUCCESS)
    } else {
        error!(
            errors = results.summary.total_errors,
            failed = results.summary.failed_tests,
            "Verification completed with errors"
        );
        Ok(ExitCode::FAILURE)
    }
}
