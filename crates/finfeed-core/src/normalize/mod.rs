//! Translation of raw provider payloads into [`CanonicalRecord`]s.
//!
//! Every upstream shape sits behind [`PayloadNormalizer`]. A markup change on
//! a scraped page therefore breaks one swappable implementation, never the
//! resolver. A missing or malformed shape is a [`NormalizeError`]: the
//! resolver records it and moves to the next tier. Individual observations
//! that fail record validation are skipped with a warning.
//!
//! | Normalizer | Payload | Notes |
//! |------------|---------|-------|
//! | [`AlphaVantageNormalizer`] | JSON | payload key chosen from an explicit per-function table |
//! | [`B3JsonNormalizer`] | JSON | quotes under `TradgFlr.scty.SctyQtn` |
//! | [`B3HtmlNormalizer`] | HTML | pt-BR numbers, `dd/mm/yyyy` dates |
//! | [`B3Normalizer`] | either | dispatches on payload format |

mod alphavantage;
mod b3;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::data_source::RawPayload;
use crate::{CanonicalRecord, DataType, Market, Symbol, UtcDateTime, ValidationError};

pub use alphavantage::{
    normalize_indicators, AlphaVantageFunction, AlphaVantageNormalizer, EconomicSeries,
    PayloadSchema, PayloadShape,
};
pub use b3::{parse_br_number, B3HtmlNormalizer, B3JsonNormalizer, B3Normalizer};

/// Identity stamped onto every record produced from one payload.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    pub symbol: &'a Symbol,
    pub market: Market,
    pub data_type: DataType,
    pub fetched_at: UtcDateTime,
}

/// Payload did not have the shape its normalizer expects.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("expected payload key '{key}' not found")]
    MissingKey { key: String },

    #[error("unexpected shape at '{path}': {detail}")]
    UnexpectedShape { path: String, detail: String },

    #[error("field '{field}' is not a number: '{value}'")]
    InvalidNumber { field: String, value: String },

    #[error("unparseable date '{value}'")]
    InvalidDate { value: String },

    #[error("payload contains no observations")]
    Empty,

    #[error("{format} payloads are not understood by this normalizer")]
    UnsupportedFormat { format: &'static str },

    #[error("observation rejected: {0}")]
    InvalidRecord(#[from] ValidationError),
}

/// Maps one raw payload shape onto canonical records, sorted by date.
pub trait PayloadNormalizer: Send + Sync {
    fn normalize(
        &self,
        payload: &RawPayload,
        ctx: &NormalizeContext<'_>,
    ) -> Result<Vec<CanonicalRecord>, NormalizeError>;
}

fn expect_object<'v>(value: &'v Value, path: &str) -> Result<&'v Map<String, Value>, NormalizeError> {
    value.as_object().ok_or_else(|| NormalizeError::UnexpectedShape {
        path: path.to_owned(),
        detail: "expected an object".to_owned(),
    })
}

/// Numeric field given either as a JSON number or a decimal string.
fn number_field(object: &Map<String, Value>, field: &str) -> Result<f64, NormalizeError> {
    let value = object.get(field).ok_or_else(|| NormalizeError::MissingKey {
        key: field.to_owned(),
    })?;
    parse_number(field, value)
}

fn parse_number(field: &str, value: &Value) -> Result<f64, NormalizeError> {
    let invalid = || NormalizeError::InvalidNumber {
        field: field.to_owned(),
        value: value.to_string(),
    };
    match value {
        Value::Number(number) => number.as_f64().ok_or_else(invalid),
        Value::String(text) => text.trim().parse::<f64>().map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// Optional volume; absent or null means the upstream does not report it.
fn volume_field(object: &Map<String, Value>, field: &str) -> Result<u64, NormalizeError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(value) => {
            let volume = parse_number(field, value)?;
            if !volume.is_finite() || volume < 0.0 {
                return Err(NormalizeError::InvalidNumber {
                    field: field.to_owned(),
                    value: value.to_string(),
                });
            }
            Ok(volume.round() as u64)
        }
    }
}

/// Gathers one payload's observations. Rows failing record validation are
/// logged and skipped; the payload only fails when none survive.
#[derive(Debug, Default)]
struct RowCollector {
    records: Vec<CanonicalRecord>,
    first_rejection: Option<ValidationError>,
}

impl RowCollector {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            first_rejection: None,
        }
    }

    fn push(&mut self, row: &str, candidate: Result<CanonicalRecord, ValidationError>) {
        match candidate {
            Ok(record) => self.records.push(record),
            Err(error) => {
                tracing::warn!(row, %error, "skipping invalid observation");
                self.first_rejection.get_or_insert(error);
            }
        }
    }

    fn finish(self) -> Result<Vec<CanonicalRecord>, NormalizeError> {
        match self.first_rejection {
            Some(error) if self.records.is_empty() => Err(NormalizeError::InvalidRecord(error)),
            _ => sorted(self.records),
        }
    }
}

fn sorted(mut records: Vec<CanonicalRecord>) -> Result<Vec<CanonicalRecord>, NormalizeError> {
    if records.is_empty() {
        return Err(NormalizeError::Empty);
    }
    records.sort_by_key(|record| record.date);
    Ok(records)
}
