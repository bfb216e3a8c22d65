//! Main entry point for CLI command to report recorded executions.
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use trace_reporter::configuration::generate_config_schema;
use trace_reporter::Config;
use trace_reporter::ExecutionResult;
use trace_reporter::TracingPipeline;
use tracing_subscriber::EnvFilter;

/// Report traced GraphQL executions to a usage reporting collector.
#[derive(Parser, Debug)]
#[command(name = "trace-reporter", author, version, about, long_about = None)]
struct Opt {
    /// Log level (off|error|warn|info|debug|trace).
    #[arg(
        long = "log",
        default_value = "info",
        alias = "log-level",
        env = "TRACE_REPORTER_LOG"
    )]
    log_level: String,

    /// Configuration file, in YAML.
    #[arg(short, long = "config", env = "TRACE_REPORTER_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Override the flush interval from the configuration, e.g. `500ms`.
    #[arg(long, value_parser = humantime::parse_duration)]
    batch_interval: Option<Duration>,

    /// Prints the configuration schema.
    #[arg(long = "print-config-schema", alias = "schema")]
    schema: bool,

    /// GraphQL responses carrying the Apollo tracing extension.
    #[arg(required_unless_present = "schema")]
    executions: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();

    if opt.schema {
        let schema = generate_config_schema();
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let builder = tracing_subscriber::fmt::fmt().with_env_filter(
        EnvFilter::try_new(&opt.log_level).context("could not parse log configuration")?,
    );
    if std::io::stdout().is_terminal() {
        builder.init();
    } else {
        builder.json().init();
    }

    let mut config = match &opt.config_path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("could not read configuration {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(batch_interval) = opt.batch_interval {
        config.batch_interval = batch_interval;
    }

    let pipeline = TracingPipeline::new(&config)?;
    for path in &opt.executions {
        let execution = std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|content| Ok(ExecutionResult::from_json(&content)?));
        match execution {
            Ok(execution) => pipeline.report_execution(&execution),
            Err(e) => tracing::error!("skipping {}: {}", path.display(), e),
        }
    }
    pipeline.shutdown().await;

    Ok(())
}
