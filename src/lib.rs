pub mod cli;
pub mod clients;
pub mod config;
pub mod constants;
pub mod domain;
pub mod models;
pub mod parser;
pub mod services;
pub mod state;
pub mod store;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::Config;
use state::AppState;

pub async fn run() -> anyhow::Result<()> {
    let config = Config::load()?;
    run_with_config(config).await
}

pub async fn run_with_config(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let _prometheus_handle = init_prometheus(&config)?;
    init_logging(&config)?;

    let cli = Cli::parse();
    let state = AppState::new(config).await?;

    let result = run_command_with_shutdown(cli, &state).await;
    if let Err(err) = state.persist_now().await {
        tracing::error!(error = %err, "failed to flush cache store on shutdown");
    }
    result
}

/// Runs the requested command to completion, or races it against Ctrl+C
/// for long-lived commands like `watch` (spec §7 "graceful shutdown").
async fn run_command_with_shutdown(cli: Cli, state: &AppState) -> anyhow::Result<()> {
    let is_watch = matches!(cli.command, Some(cli::Commands::Watch { .. }));
    if !is_watch {
        return cli::run_command(cli, state).await;
    }

    tokio::select! {
        result = cli::run_command(cli, state) => result,
        _ = signal::ctrl_c() => {
            info!("shutdown signal received, flushing state");
            Ok(())
        }
    }
}

fn init_prometheus(
    config: &Config,
) -> anyhow::Result<Option<metrics_exporter_prometheus::PrometheusHandle>> {
    if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        info!("Prometheus metrics recorder initialized");
        Ok(Some(handle))
    } else {
        Ok(None)
    }
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let mut log_level = config.general.log_level.clone();
    if config.general.suppress_connection_errors {
        log_level.push_str(",reqwest::retry=off,hyper_util=off");
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let use_json = config.observability.loki_enabled
        || std::env::var("LOG_FORMAT").unwrap_or_default() == "json";

    if use_json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false);

        if config.observability.loki_enabled {
            let url =
                url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

            let (loki_layer, task) = tracing_loki::builder()
                .label("app", "renamarr")?
                .extra_field("env", "production")?
                .extra_field("version", env!("CARGO_PKG_VERSION"))?
                .build_url(url)?;

            tokio::spawn(task);
            registry.with(fmt_layer).with(loki_layer).init();
            info!(
                "Loki logging initialized at {}",
                config.observability.loki_url
            );
        } else {
            registry.with(fmt_layer).init();
        }
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().pretty();
        registry.with(fmt_layer).init();
    }
    Ok(())
}
