use std::time::Duration;

use finfeed_core::{DataType, DateWindow, FetchRequest, Market, Maturity, Pipeline, Symbol};
use serde_json::json;

use crate::cli::{default_data_type, FetchArgs};
use crate::commands::CommandResult;
use crate::error::CliError;

pub async fn run(args: &FetchArgs, pipeline: &Pipeline) -> Result<CommandResult, CliError> {
    let max_cache_age = args
        .max_cache_age_hours
        .map(|hours| Duration::from_secs(hours.saturating_mul(3600)))
        .unwrap_or_else(|| pipeline.config().max_cache_age());

    let mut request = build_request(args)?
        .with_interval(args.interval)
        .with_output_size(args.output_size)
        .with_cache_mode(args.cache.into())
        .with_max_cache_age(max_cache_age);
    if args.start.is_some() || args.end.is_some() {
        request = request.with_window(DateWindow::new(args.start, args.end)?);
    }

    let resolution = pipeline.fetch(&request).await?;

    let data = if args.summary {
        json!({
            "symbol": request.symbol,
            "tier": resolution.tier,
            "provider": resolution.provider,
            "freshness": resolution.freshness,
            "attempts": resolution.attempts,
            "rows": resolution.records.len(),
        })
    } else {
        serde_json::to_value(&resolution)?
    };

    Ok(CommandResult::ok(data)
        .with_warnings(resolution.warnings.clone())
        .with_latency(resolution.latency_ms))
}

/// Interpret the positional symbol according to market and data type.
fn build_request(args: &FetchArgs) -> Result<FetchRequest, CliError> {
    let data_type = args
        .data_type
        .unwrap_or_else(|| default_data_type(args.market));

    match (args.market, data_type) {
        (Market::Forex, DataType::Forex) => {
            let pair: String = args.symbol.chars().filter(|ch| *ch != '/').collect();
            if pair.len() != 6 || !pair.is_ascii() {
                return Err(CliError::Command(format!(
                    "forex pair must look like EURUSD or EUR/USD, got '{}'",
                    args.symbol
                )));
            }
            let (from, to) = pair.split_at(3);
            Ok(FetchRequest::forex(from, to)?)
        }
        (Market::Us, DataType::Bond) => {
            let maturity = match args.symbol.parse::<Maturity>() {
                Ok(maturity) => maturity,
                Err(error) => Maturity::from_series_symbol(&Symbol::parse(&args.symbol)?)
                    .ok_or(error)?,
            };
            Ok(FetchRequest::treasury_yield(maturity)?)
        }
        (market, data_type) => Ok(FetchRequest::new(
            Symbol::parse(&args.symbol)?,
            market,
            data_type,
        )?),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Command};

    fn fetch_args(argv: &[&str]) -> FetchArgs {
        let mut full = vec!["finfeed", "fetch"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).expect("parse").command {
            Command::Fetch(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn slash_separated_pair_becomes_forex_request() {
        let request = build_request(&fetch_args(&["eur/usd", "--market", "forex"])).expect("request");
        assert_eq!(request.symbol.as_str(), "EURUSD");
        assert_eq!(request.data_type, DataType::Forex);
    }

    #[test]
    fn maturity_or_series_symbol_selects_treasury_series() {
        let by_maturity =
            build_request(&fetch_args(&["10year", "--data-type", "bond"])).expect("maturity");
        let by_series =
            build_request(&fetch_args(&["TREASURY_10YEAR", "--data-type", "bond"])).expect("series");
        assert_eq!(by_maturity, by_series);
        assert_eq!(by_maturity.symbol.as_str(), "TREASURY_10YEAR");
    }

    #[test]
    fn unsupported_market_data_type_pair_is_rejected() {
        let result = build_request(&fetch_args(&["PETR4", "--market", "br", "--data-type", "bond"]));
        assert!(matches!(result, Err(CliError::Validation(_))));
    }

    #[test]
    fn br_defaults_to_stock() {
        let request = build_request(&fetch_args(&["petr4", "--market", "br"])).expect("request");
        assert_eq!(request.market, Market::Br);
        assert_eq!(request.data_type, DataType::Stock);
    }
}
