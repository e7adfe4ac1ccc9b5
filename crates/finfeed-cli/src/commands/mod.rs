mod backup;
mod fetch;
mod history;
mod indicators;
mod ingest;

use finfeed_core::{Pipeline, PipelineConfig};
use serde_json::{json, Value};

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub latency_ms: u64,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            latency_ms: 0,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn envelope(&self) -> Value {
        json!({
            "data": self.data,
            "meta": {
                "warnings": self.warnings,
                "latency_ms": self.latency_ms,
            },
        })
    }
}

pub async fn run(cli: &Cli, mut config: PipelineConfig) -> Result<CommandResult, CliError> {
    if let Command::Ingest(args) = &cli.command {
        if let Some(concurrency) = args.concurrency {
            config.ingest_concurrency = concurrency.max(1);
        }
    }

    let pipeline = Pipeline::open(config)?;
    tracing::debug!(command = ?cli.command, "running command");

    match &cli.command {
        Command::Fetch(args) => fetch::run(args, &pipeline).await,
        Command::Ingest(_) => ingest::run(&pipeline).await,
        Command::History(args) => history::run(args, &pipeline).await,
        Command::Indicators(args) => indicators::run(args, &pipeline).await,
        Command::Backup(args) => backup::run(args, &pipeline).await,
    }
}
