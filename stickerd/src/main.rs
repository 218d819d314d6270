use anyhow::anyhow;
use clap::Parser;
use stickerd::{Application, Config, config::Args, telemetry};
use tracing::{info, warn};

/// Resolves on SIGTERM or Ctrl+C, naming the signal received.
#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        },
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler, only Ctrl+C stops the server");
            match tokio::signal::ctrl_c().await {
                Ok(()) => "SIGINT",
                Err(_) => std::future::pending().await,
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "Ctrl+C",
        Err(_) => std::future::pending().await,
    }
}

async fn shutdown_signal() {
    let signal = wait_for_signal().await;
    info!(signal, "Shutting down gracefully, finishing in-flight requests and archival uploads");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // TLS clients for Supabase and OpenAI need a process-wide crypto provider
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow!("a rustls crypto provider is already installed"))?;

    let args = Args::parse();
    let config = Config::load(&args)?;

    if args.validate {
        println!(
            "Configuration in {} is valid: listening on {}, session cookie {}",
            args.config,
            config.bind_address(),
            config.session_cookie_name()
        );
        return Ok(());
    }

    telemetry::init_telemetry(config.enable_otel_export)?;

    info!(
        config_file = %args.config,
        bind_address = %config.bind_address(),
        transform = ?config.transform.provider,
        storage = ?config.storage.backend,
        metrics = config.enable_metrics,
        "Configuration loaded"
    );

    Application::new(config)?.serve(shutdown_signal()).await
}
