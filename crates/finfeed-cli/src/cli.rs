//! CLI argument definitions for finfeed.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fetch` | Resolve one series through the fallback chain |
//! | `ingest` | Refresh every watchlist entry concurrently |
//! | `history` | Read stored history from the local database |
//! | `indicators` | Latest stored economic indicators, optionally refreshed first |
//! | `backup` | Copy the database into the backup directory |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `$FINFEED_HOME/finfeed.toml` | Configuration file |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--strict` | `false` | Treat warnings (stale data, failed entries) as errors |
//!
//! # Examples
//!
//! ```bash
//! # Daily PETR4 prices from B3
//! finfeed fetch PETR4 --market br
//!
//! # Weekly Apple prices, going live before any cached copy
//! finfeed fetch AAPL --interval weekly --cache refresh
//!
//! # EUR/USD and the 10 year treasury yield
//! finfeed fetch EURUSD --market forex
//! finfeed fetch 10year --data-type bond
//!
//! # Refresh the watchlist and fail on any stale entry
//! finfeed ingest --strict
//!
//! # Pull US macro series, then show the newest values
//! finfeed indicators us --refresh
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use finfeed_core::{
    parse_iso_date, CacheMode, DataType, Interval, Market, OutputSize, DEFAULT_HISTORY_DAYS,
};
use time::Date;

/// finfeed - market data acquisition for equities, FX and treasury yields
#[derive(Debug, Parser)]
#[command(
    name = "finfeed",
    author,
    version,
    about = "Market data acquisition pipeline",
    long_about = "finfeed fetches daily market data from Alpha Vantage and B3 and \
keeps it in a local DuckDB database. Every request walks a fallback chain:\n\
\n\
  • fresh cache\n\
  • persistent store (B3 only)\n\
  • live primary and secondary transports\n\
  • stale cache\n\
\n\
Use 'finfeed <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Configuration file. Defaults to `finfeed.toml` under FINFEED_HOME.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Treat warnings as failures (exit code 5).
    #[arg(long, global = true, default_value_t = false)]
    pub strict: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve one series through cache, store and live providers.
    ///
    /// # Examples
    ///
    ///   finfeed fetch PETR4 --market br
    ///   finfeed fetch HGLG11 --market br --data-type fii
    ///   finfeed fetch EURUSD --market forex --output-size compact
    ///   finfeed fetch 10year --data-type bond --interval monthly
    Fetch(FetchArgs),

    /// Refresh every watchlist entry from the configuration file.
    Ingest(IngestArgs),

    /// Read stored history for one series.
    ///
    /// # Examples
    ///
    ///   finfeed history PETR4 --market br --days 30
    History(HistoryArgs),

    /// Latest stored economic indicators for a country.
    Indicators(IndicatorsArgs),

    /// Back up the local database.
    Backup(BackupArgs),
}

/// Cache behaviour for a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheArg {
    /// Serve a fresh entry or stored rows when present; write live results through.
    Use,
    /// Go live first; still write through and allow stale fallback.
    Refresh,
    /// Go live without reading or writing the cache.
    Bypass,
}

impl From<CacheArg> for CacheMode {
    fn from(value: CacheArg) -> Self {
        match value {
            CacheArg::Use => Self::Use,
            CacheArg::Refresh => Self::Refresh,
            CacheArg::Bypass => Self::Bypass,
        }
    }
}

/// Arguments for the `fetch` command.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Ticker (AAPL, PETR4), currency pair (EURUSD, EUR/USD) or treasury
    /// maturity (10year) depending on market and data type.
    pub symbol: String,

    /// Market: us, br or forex.
    #[arg(long, default_value = "us")]
    pub market: Market,

    /// Data type: stock, bond, fii or forex. Inferred from the market when omitted.
    #[arg(long)]
    pub data_type: Option<DataType>,

    /// Sampling interval: daily, weekly or monthly.
    #[arg(long, default_value = "daily")]
    pub interval: Interval,

    /// History depth requested upstream: compact or full.
    #[arg(long, default_value = "full")]
    pub output_size: OutputSize,

    #[arg(long, value_enum, default_value_t = CacheArg::Use)]
    pub cache: CacheArg,

    /// Maximum age of a fresh cache entry, in hours. Defaults to the configured value.
    #[arg(long)]
    pub max_cache_age_hours: Option<u64>,

    /// First day to include (YYYY-MM-DD).
    #[arg(long, value_parser = parse_date)]
    pub start: Option<Date>,

    /// Last day to include (YYYY-MM-DD).
    #[arg(long, value_parser = parse_date)]
    pub end: Option<Date>,

    /// Print only the resolution summary, without records.
    #[arg(long, default_value_t = false)]
    pub summary: bool,
}

/// Arguments for the `ingest` command.
#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Override the configured number of concurrent requests.
    #[arg(long)]
    pub concurrency: Option<usize>,
}

/// Arguments for the `history` command.
#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Stored symbol (PETR4, EURUSD, TREASURY_10YEAR).
    pub symbol: String,

    #[arg(long, default_value = "us")]
    pub market: Market,

    #[arg(long)]
    pub data_type: Option<DataType>,

    /// Trailing calendar days ending today.
    #[arg(long, default_value_t = DEFAULT_HISTORY_DAYS)]
    pub days: u32,
}

/// Arguments for the `indicators` command.
#[derive(Debug, Args)]
pub struct IndicatorsArgs {
    /// Country code, e.g. BR or US.
    pub country: String,

    /// Fetch the latest published series before reading (US only).
    #[arg(long, default_value_t = false)]
    pub refresh: bool,
}

/// Arguments for the `backup` command.
#[derive(Debug, Args)]
pub struct BackupArgs {
    /// Back up even when the configured frequency has not elapsed.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}

/// Default data type for a market when none is given.
pub const fn default_data_type(market: Market) -> DataType {
    match market {
        Market::Us | Market::Br => DataType::Stock,
        Market::Forex => DataType::Forex,
    }
}

fn parse_date(value: &str) -> Result<Date, String> {
    parse_iso_date(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn fetch_parses_market_and_window() {
        let cli = Cli::try_parse_from([
            "finfeed", "fetch", "petr4", "--market", "BR", "--start", "2024-03-01", "--cache",
            "refresh",
        ])
        .expect("parse");

        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert_eq!(args.market, Market::Br);
        assert_eq!(args.data_type, None);
        assert_eq!(args.cache, CacheArg::Refresh);
        assert_eq!(args.start, Some(time::macros::date!(2024 - 03 - 01)));
        assert_eq!(args.interval, Interval::Daily);
    }

    #[test]
    fn fetch_rejects_malformed_dates() {
        let result = Cli::try_parse_from(["finfeed", "fetch", "AAPL", "--end", "03/01/2024"]);
        assert!(result.is_err());
    }

    #[test]
    fn history_defaults_to_a_year() {
        let cli = Cli::try_parse_from(["finfeed", "history", "AAPL"]).expect("parse");
        let Command::History(args) = cli.command else {
            panic!("expected history");
        };
        assert_eq!(args.days, DEFAULT_HISTORY_DAYS);
    }

    #[test]
    fn indicators_read_only_unless_refresh_is_given() {
        let cli = Cli::try_parse_from(["finfeed", "indicators", "us"]).expect("parse");
        let Command::Indicators(args) = cli.command else {
            panic!("expected indicators");
        };
        assert!(!args.refresh);

        let cli = Cli::try_parse_from(["finfeed", "indicators", "us", "--refresh"]).expect("parse");
        let Command::Indicators(args) = cli.command else {
            panic!("expected indicators");
        };
        assert!(args.refresh);
    }
}
