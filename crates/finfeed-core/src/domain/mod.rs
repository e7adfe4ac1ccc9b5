//! # Domain Models
//!
//! Canonical domain types for finfeed market data.
//!
//! ## Models
//!
//! | Type | Description |
//! |------|-------------|
//! | [`CanonicalRecord`] | Daily OHLCV record keyed by symbol, date and data type |
//! | [`EconomicIndicator`] | Scalar indicator keyed by country, name and date |
//! | [`Symbol`] | Validated, uppercase ticker or series name |
//! | [`Market`] | `US`, `BR` or `FOREX` |
//! | [`DataType`] | `stock`, `bond`, `fii` or `forex` |
//! | [`Interval`] | Daily, weekly or monthly sampling |
//! | [`OutputSize`] | Compact or full history |
//! | [`Maturity`] | Treasury maturity for yield series |
//! | [`DateWindow`] | Inclusive calendar-date bounds |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! ## Validation
//!
//! Construction validates invariants, so a record that exists is usable:
//!
//! ```rust,ignore
//! use finfeed_core::{CanonicalRecord, DataType, Market, Symbol, UtcDateTime, ValidationError};
//! use time::macros::date;
//!
//! let symbol = Symbol::parse("petr4")?;
//! let now = UtcDateTime::now();
//!
//! // high < low is rejected
//! let invalid = CanonicalRecord::new(
//!     symbol, Market::Br, date!(2024 - 03 - 01), 10.0, 9.0, 11.0, 10.0, 0, DataType::Stock, now,
//! );
//! assert!(matches!(invalid, Err(ValidationError::InvalidBarRange)));
//! ```

mod interval;
mod models;
mod symbol;
mod timestamp;

pub use interval::{Interval, OutputSize};
pub use models::{
    format_iso_date, parse_iso_date, CanonicalRecord, DataType, DateWindow, EconomicIndicator,
    Market, Maturity,
};
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
