use finfeed_core::{IngestOutcome, Pipeline};

use crate::commands::CommandResult;
use crate::error::CliError;

pub async fn run(pipeline: &Pipeline) -> Result<CommandResult, CliError> {
    if pipeline.config().watchlist.is_empty() {
        return Err(CliError::Command(
            "watchlist is empty; add [[watchlist]] entries to the configuration".to_string(),
        ));
    }

    let update = pipeline.update_watchlist().await?;

    let mut warnings: Vec<String> = update
        .report
        .entries
        .iter()
        .filter_map(|entry| match &entry.outcome {
            IngestOutcome::Failed { message } => Some(message.clone()),
            IngestOutcome::Served { stale: true, .. } => Some(format!(
                "{} ({}/{}) served from stale cache",
                entry.symbol, entry.market, entry.data_type
            )),
            IngestOutcome::Served { .. } => None,
        })
        .collect();
    if let Some(error) = &update.backup_error {
        warnings.push(format!("scheduled backup failed: {error}"));
    }

    Ok(CommandResult::ok(serde_json::to_value(&update)?)
        .with_warnings(warnings)
        .with_latency(update.report.elapsed_ms))
}
