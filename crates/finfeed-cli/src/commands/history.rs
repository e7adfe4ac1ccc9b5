use std::time::Instant;

use finfeed_core::{Pipeline, Symbol};
use serde_json::json;

use crate::cli::{default_data_type, HistoryArgs};
use crate::commands::CommandResult;
use crate::error::CliError;

pub async fn run(args: &HistoryArgs, pipeline: &Pipeline) -> Result<CommandResult, CliError> {
    let started = Instant::now();
    let symbol = Symbol::parse(&args.symbol)?;
    let data_type = args
        .data_type
        .unwrap_or_else(|| default_data_type(args.market));

    let records = pipeline
        .history(&symbol, args.market, data_type, args.days)
        .await?;

    let mut warnings = Vec::new();
    if records.is_empty() {
        warnings.push(format!(
            "no stored rows for {symbol} in the last {} day(s)",
            args.days
        ));
    }

    Ok(CommandResult::ok(json!({
        "symbol": symbol,
        "market": args.market,
        "data_type": data_type,
        "records": records,
    }))
    .with_warnings(warnings)
    .with_latency(started.elapsed().as_millis() as u64))
}
