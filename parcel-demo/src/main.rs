//! Example worker process: registers a handful of demo tasks and runs the
//! supervisor to completion.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde_json::Value;
use tracing::info;

use parcel_core::config::AppConfig;
use parcel_core::task::TaskFuture;
use parcel_core::{Application, DefaultRouter, RedisBroker, RemoteError, TaskOptions};
use parcel_worker::plugins::{Beat, ScheduleEntry, TaskKiller, TracingLogger};
use parcel_worker::{Plugin, Supervisor};

#[derive(Parser, Debug)]
#[command(name = "parcel-demo")]
#[command(about = "Runs a parcel worker pool against a Redis broker", long_about = None)]
struct CliArgs {
    /// Path to a TOML config file (see parcel-core::config::AppConfig)
    #[arg(long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override worker.concurrency
    #[arg(long)]
    concurrency: Option<usize>,

    /// Override worker.queues (comma-separated)
    #[arg(long, value_delimiter = ',')]
    queues: Option<Vec<String>>,

    /// Override broker.broker_url
    #[arg(long = "broker-url")]
    broker_url: Option<String>,

    /// Override worker.poll_interval_seconds (fetch_timeout)
    #[arg(long = "fetch-timeout")]
    fetch_timeout: Option<f64>,

    /// Seconds to sleep between retries after a broker error
    #[arg(long = "error-timeout", default_value_t = 2.0)]
    error_timeout: f64,

    /// tracing-subscriber env filter, e.g. "info" or "parcel_worker=debug"
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    /// Directory for a daily-rolling log file. Logs go to stdout when unset.
    #[arg(long = "log-dir", value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

fn register_demo_tasks(app: &Application) {
    app.task(
        Arc::new(|args, _kwargs| {
            let x = args.first().and_then(Value::as_i64).unwrap_or(0);
            let y = args.get(1).and_then(Value::as_i64).unwrap_or(0);
            Box::pin(async move { Ok::<Value, RemoteError>(Value::from(x + y)) }) as TaskFuture
        }),
        TaskOptions {
            name: Some("t.add".to_string()),
            ..Default::default()
        },
    );

    app.task(
        Arc::new(|_args, _kwargs| {
            Box::pin(async move { Err::<Value, RemoteError>(RemoteError::new("ValueError", "nope")) })
                as TaskFuture
        }),
        TaskOptions {
            name: Some("t.flaky".to_string()),
            throws: ["ValueError".to_string()].into_iter().collect(),
            ..Default::default()
        },
    );

    app.task(
        Arc::new(|_args, _kwargs| {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                Ok::<Value, RemoteError>(Value::Null)
            }) as TaskFuture
        }),
        TaskOptions {
            name: Some("t.hang".to_string()),
            time_limit: Some(1),
            ..Default::default()
        },
    );

    app.task(
        Arc::new(|_args, _kwargs| {
            Box::pin(async move { Ok::<Value, RemoteError>(Value::String("pong".to_string())) }) as TaskFuture
        }),
        TaskOptions {
            name: Some("t.ping".to_string()),
            ..Default::default()
        },
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliArgs::parse();

    // Holds the non-blocking writer's worker thread alive for the process
    // lifetime; dropping it would silently stop flushing log lines.
    let _log_guard = match &cli.log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "parcel-demo.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(cli.log_level.clone()))
                .with_writer(non_blocking)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(cli.log_level.clone()))
                .init();
            None
        }
    };

    let mut config = match &cli.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            AppConfig::from_toml_str(&content).context("parsing config file")?
        }
        None => AppConfig::default(),
    };

    if let Some(concurrency) = cli.concurrency {
        config.worker.concurrency = concurrency;
    }
    if let Some(queues) = cli.queues {
        config.worker.queues = queues;
    }
    if let Some(fetch_timeout) = cli.fetch_timeout {
        config.worker.poll_interval_seconds = fetch_timeout;
    }
    if let Some(broker_url) = cli.broker_url {
        config.broker.get_or_insert_with(Default::default).broker_url = broker_url;
    }
    config.validate().context("invalid configuration")?;

    let broker_config = config
        .broker
        .as_ref()
        .context("broker configuration is required to run a worker")?;

    let broker = RedisBroker::connect(
        broker_config.broker_url.clone(),
        broker_config.result_expires,
        broker_config.gzip_min_length,
    )
    .await
    .context("connecting to broker")?;

    let router = DefaultRouter::new(config.router.task_routes.clone(), config.router.default_queue.clone());
    let app = Application::new(Arc::new(broker), Arc::new(router));
    register_demo_tasks(&app);

    info!(
        concurrency = config.worker.concurrency,
        queues = ?config.worker.queues,
        "starting worker supervisor"
    );

    let schedule_entries = config
        .schedule
        .iter()
        .map(|entry| {
            Ok(ScheduleEntry {
                task: entry.task.clone(),
                args: entry.args.clone(),
                kwargs: Default::default(),
                queue: entry.queue.clone(),
                crontab: entry.crontab()?,
            })
        })
        .collect::<Result<Vec<_>, parcel_core::error::ConfigError>>()
        .context("building schedule entries")?;

    let plugins: Vec<Box<dyn Plugin>> = vec![
        Box::new(TracingLogger),
        Box::new(TaskKiller::new()),
        Box::new(Beat::new(schedule_entries, Utc::now(), cli.error_timeout)),
    ];

    let supervisor = Supervisor::new(
        app,
        config.worker.concurrency,
        config.worker.queues.clone(),
        config.worker.poll_interval_seconds,
        cli.error_timeout,
        plugins,
    );

    supervisor.run().await.context("supervisor exited with an error")?;
    info!("worker supervisor shut down cleanly");
    Ok(())
}
