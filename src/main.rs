//! logmailer - send structured log events as plain-text email over SMTP.

use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use logmailer::cli::{Cli, LogFormat};
use logmailer::compose::BodyStrategy;
use logmailer::config::{Config, RuntimeConfig};
use logmailer::{MailOutput, MetricsServer, input};

/// Initialize the tracing subscriber with the specified log format.
fn init_logging(format: LogFormat) {
    // RUST_LOG replaces the default level instead of being capped by it.
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();

    match format {
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .flatten_event(true)
                .with_env_filter(filter)
                .init();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_format);

    info!(config_path = %cli.config.display(), "Loading configuration");

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, path = %cli.config.display(), "Failed to load configuration");
            std::process::exit(1);
        }
    };

    info!("Validating configuration");
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!(error = %e, "Configuration validation error");
        }
        error!(
            error_count = errors.len(),
            "Configuration validation failed"
        );
        std::process::exit(1);
    }

    let runtime_config = config.compile()?;

    if cli.validate {
        print_summary(&cli.config, &runtime_config);
        return Ok(());
    }

    info!(config_path = %cli.config.display(), "logmailer starting");

    // Sends are sequential; one thread is enough.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(run(runtime_config, cli.input.as_deref()));
    // A blocking stdin read would otherwise keep the process alive.
    runtime.shutdown_background();
    result
}

fn print_summary(path: &Path, runtime: &RuntimeConfig) {
    let delivery = &runtime.delivery;
    println!("Configuration is valid: {}", path.display());
    println!("  SMTP server: {}:{}", delivery.host, delivery.port);
    println!(
        "  Authentication: {}",
        if delivery.credentials.is_some() {
            "enabled"
        } else {
            "anonymous"
        }
    );
    println!(
        "  Recipients: {}",
        delivery.recipients.addresses().len()
    );
    println!(
        "  Body: {}",
        match runtime.composer.body_strategy() {
            BodyStrategy::KeyValue { .. } => "key/value",
            BodyStrategy::Template { .. } => "template",
        }
    );
    println!(
        "  Metrics: {} (port {})",
        if runtime.metrics.enabled {
            "enabled"
        } else {
            "disabled"
        },
        runtime.metrics.port
    );
}

/// Main async entry point.
async fn run(runtime_config: RuntimeConfig, input_path: Option<&Path>) -> Result<()> {
    let cancel = CancellationToken::new();

    let metrics_handle = if runtime_config.metrics.enabled {
        let server = MetricsServer::new(runtime_config.metrics.port);
        let cancel_metrics = cancel.clone();
        info!(port = runtime_config.metrics.port, "Starting metrics server");
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(cancel_metrics).await {
                error!(error = %e, "Metrics server error");
            }
        }))
    } else {
        info!("Metrics server disabled");
        None
    };

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c signal");
            return;
        }
        info!("Received shutdown signal, initiating graceful shutdown");
        cancel_clone.cancel();
    });

    let input_config = runtime_config.input.clone();
    let output = MailOutput::from_runtime(runtime_config)?;

    let reader: Box<dyn AsyncRead + Unpin> = match input_path {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open input {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let output = &output;
    let result = input::run(
        BufReader::new(reader),
        &input_config,
        cancel.clone(),
        move |batch| async move {
            output.emit(&batch).await;
        },
    )
    .await;

    cancel.cancel();
    if let Some(handle) = metrics_handle {
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    match result {
        Ok(stats) => {
            info!(
                events = stats.events,
                batches = stats.batches,
                "logmailer shutdown complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Input error");
            Err(anyhow::anyhow!("Input error: {}", e))
        }
    }
}
