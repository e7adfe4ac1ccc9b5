use finfeed_core::{CoreError, Pipeline};
use serde_json::json;

use crate::cli::IndicatorsArgs;
use crate::commands::CommandResult;
use crate::error::CliError;

pub async fn run(args: &IndicatorsArgs, pipeline: &Pipeline) -> Result<CommandResult, CliError> {
    let country = args.country.trim().to_ascii_uppercase();

    let refresh = if args.refresh {
        Some(pipeline.refresh_indicators(&country).await?)
    } else {
        None
    };

    let indicators = pipeline
        .store()
        .latest_indicators(&country)
        .await
        .map_err(CoreError::from)?;

    let warnings = refresh
        .as_ref()
        .map(|refresh| refresh.warnings.clone())
        .unwrap_or_default();

    Ok(CommandResult::ok(json!({
        "country": country,
        "refreshed": refresh.map(|refresh| refresh.refreshed),
        "indicators": indicators,
    }))
    .with_warnings(warnings))
}
