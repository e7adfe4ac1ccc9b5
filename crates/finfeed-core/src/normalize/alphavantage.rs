use serde_json::Value;
use time::Date;

use super::{
    expect_object, number_field, volume_field, NormalizeContext, NormalizeError,
    PayloadNormalizer, RowCollector,
};
use crate::data_source::RawPayload;
use crate::{
    format_iso_date, parse_iso_date, CanonicalRecord, DataType, EconomicIndicator, FetchRequest,
    Interval, UtcDateTime,
};

/// Layout of the observations under a payload key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// Object of `date -> {"1. open", "2. high", "3. low", "4. close", ["5. volume"]}`.
    Ohlcv,
    /// Array of `{"date", "value"}`; `"."` marks a missing observation.
    ValueSeries,
}

/// Where a function's observations live in the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadSchema {
    pub key: &'static str,
    pub shape: PayloadShape,
}

/// Alpha Vantage `function` parameter values this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlphaVantageFunction {
    TimeSeriesDaily,
    TimeSeriesWeekly,
    TimeSeriesMonthly,
    FxDaily,
    FxWeekly,
    FxMonthly,
    TreasuryYield,
}

impl AlphaVantageFunction {
    pub const ALL: [Self; 7] = [
        Self::TimeSeriesDaily,
        Self::TimeSeriesWeekly,
        Self::TimeSeriesMonthly,
        Self::FxDaily,
        Self::FxWeekly,
        Self::FxMonthly,
        Self::TreasuryYield,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TimeSeriesDaily => "TIME_SERIES_DAILY",
            Self::TimeSeriesWeekly => "TIME_SERIES_WEEKLY",
            Self::TimeSeriesMonthly => "TIME_SERIES_MONTHLY",
            Self::FxDaily => "FX_DAILY",
            Self::FxWeekly => "FX_WEEKLY",
            Self::FxMonthly => "FX_MONTHLY",
            Self::TreasuryYield => "TREASURY_YIELD",
        }
    }

    /// The per-function schema table.
    pub const fn schema(self) -> PayloadSchema {
        let (key, shape) = match self {
            Self::TimeSeriesDaily => ("Time Series (Daily)", PayloadShape::Ohlcv),
            Self::TimeSeriesWeekly => ("Weekly Time Series", PayloadShape::Ohlcv),
            Self::TimeSeriesMonthly => ("Monthly Time Series", PayloadShape::Ohlcv),
            Self::FxDaily => ("Time Series FX (Daily)", PayloadShape::Ohlcv),
            Self::FxWeekly => ("Time Series FX (Weekly)", PayloadShape::Ohlcv),
            Self::FxMonthly => ("Time Series FX (Monthly)", PayloadShape::Ohlcv),
            Self::TreasuryYield => ("data", PayloadShape::ValueSeries),
        };
        PayloadSchema { key, shape }
    }

    /// Function serving a request, if Alpha Vantage covers its data type.
    pub fn for_request(req: &FetchRequest) -> Option<Self> {
        let function = match (req.data_type, req.interval) {
            (DataType::Stock, Interval::Daily) => Self::TimeSeriesDaily,
            (DataType::Stock, Interval::Weekly) => Self::TimeSeriesWeekly,
            (DataType::Stock, Interval::Monthly) => Self::TimeSeriesMonthly,
            (DataType::Forex, Interval::Daily) => Self::FxDaily,
            (DataType::Forex, Interval::Weekly) => Self::FxWeekly,
            (DataType::Forex, Interval::Monthly) => Self::FxMonthly,
            (DataType::Bond, _) => Self::TreasuryYield,
            (DataType::Fii, _) => return None,
        };
        Some(function)
    }

    pub const fn sends_output_size(self) -> bool {
        !matches!(self, Self::TreasuryYield)
    }
}

/// Normalizer for one Alpha Vantage function.
#[derive(Debug, Clone, Copy)]
pub struct AlphaVantageNormalizer {
    function: AlphaVantageFunction,
}

impl AlphaVantageNormalizer {
    pub const fn new(function: AlphaVantageFunction) -> Self {
        Self { function }
    }
}

impl PayloadNormalizer for AlphaVantageNormalizer {
    fn normalize(
        &self,
        payload: &RawPayload,
        ctx: &NormalizeContext<'_>,
    ) -> Result<Vec<CanonicalRecord>, NormalizeError> {
        let RawPayload::Json(body) = payload else {
            return Err(NormalizeError::UnsupportedFormat {
                format: payload.format(),
            });
        };

        let schema = self.function.schema();
        let series = body.get(schema.key).ok_or_else(|| NormalizeError::MissingKey {
            key: schema.key.to_owned(),
        })?;

        match schema.shape {
            PayloadShape::Ohlcv => ohlcv_series(series, schema.key, ctx),
            PayloadShape::ValueSeries => value_series(series, schema.key, ctx),
        }
    }
}

fn ohlcv_series(
    series: &Value,
    path: &str,
    ctx: &NormalizeContext<'_>,
) -> Result<Vec<CanonicalRecord>, NormalizeError> {
    let series = expect_object(series, path)?;
    let mut rows = RowCollector::with_capacity(series.len());

    for (day, bar) in series {
        let date = parse_iso_date(day).map_err(|_| NormalizeError::InvalidDate {
            value: day.clone(),
        })?;
        let bar = expect_object(bar, day)?;

        rows.push(
            day,
            CanonicalRecord::new(
                ctx.symbol.clone(),
                ctx.market,
                date,
                number_field(bar, "1. open")?,
                number_field(bar, "2. high")?,
                number_field(bar, "3. low")?,
                number_field(bar, "4. close")?,
                volume_field(bar, "5. volume")?,
                ctx.data_type,
                ctx.fetched_at,
            ),
        );
    }

    rows.finish()
}

fn value_series(
    series: &Value,
    path: &str,
    ctx: &NormalizeContext<'_>,
) -> Result<Vec<CanonicalRecord>, NormalizeError> {
    let observations = dated_values(series, path)?;
    let mut rows = RowCollector::with_capacity(observations.len());
    for (date, value) in observations {
        rows.push(
            &format_iso_date(date),
            CanonicalRecord::from_value(
                ctx.symbol.clone(),
                ctx.market,
                date,
                value,
                ctx.data_type,
                ctx.fetched_at,
            ),
        );
    }
    rows.finish()
}

/// `(date, value)` pairs of a `[{"date", "value"}]` array, missing markers dropped.
fn dated_values(series: &Value, path: &str) -> Result<Vec<(Date, f64)>, NormalizeError> {
    let observations = series
        .as_array()
        .ok_or_else(|| NormalizeError::UnexpectedShape {
            path: path.to_owned(),
            detail: "expected an array".to_owned(),
        })?;

    let mut values = Vec::with_capacity(observations.len());
    for observation in observations {
        let observation = expect_object(observation, path)?;
        if matches!(observation.get("value"), Some(Value::String(text)) if is_missing_marker(text)) {
            continue;
        }

        let day = observation
            .get("date")
            .and_then(Value::as_str)
            .ok_or_else(|| NormalizeError::MissingKey {
                key: "date".to_owned(),
            })?;
        let date = parse_iso_date(day).map_err(|_| NormalizeError::InvalidDate {
            value: day.to_owned(),
        })?;
        values.push((date, number_field(observation, "value")?));
    }
    Ok(values)
}

/// US macro series published by Alpha Vantage and stored as economic
/// indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EconomicSeries {
    RealGdp,
    Cpi,
    Inflation,
    FederalFundsRate,
    Unemployment,
}

impl EconomicSeries {
    pub const ALL: [Self; 5] = [
        Self::RealGdp,
        Self::Cpi,
        Self::Inflation,
        Self::FederalFundsRate,
        Self::Unemployment,
    ];

    /// Country every series describes.
    pub const COUNTRY: &'static str = "US";

    /// Payload key holding the observations.
    pub const KEY: &'static str = "data";

    pub const fn function(self) -> &'static str {
        match self {
            Self::RealGdp => "REAL_GDP",
            Self::Cpi => "CPI",
            Self::Inflation => "INFLATION",
            Self::FederalFundsRate => "FEDERAL_FUNDS_RATE",
            Self::Unemployment => "UNEMPLOYMENT",
        }
    }

    /// Name stored in the `indicator_name` column.
    pub const fn indicator_name(self) -> &'static str {
        match self {
            Self::RealGdp => "real_gdp",
            Self::Cpi => "cpi",
            Self::Inflation => "inflation",
            Self::FederalFundsRate => "federal_funds_rate",
            Self::Unemployment => "unemployment",
        }
    }
}

/// Every observation of one macro series, oldest first.
pub fn normalize_indicators(
    series: EconomicSeries,
    body: &Value,
    fetched_at: UtcDateTime,
) -> Result<Vec<EconomicIndicator>, NormalizeError> {
    let data = body
        .get(EconomicSeries::KEY)
        .ok_or_else(|| NormalizeError::MissingKey {
            key: EconomicSeries::KEY.to_owned(),
        })?;

    let mut indicators = dated_values(data, EconomicSeries::KEY)?
        .into_iter()
        .map(|(date, value)| {
            EconomicIndicator::new(
                EconomicSeries::COUNTRY,
                series.indicator_name(),
                date,
                value,
                fetched_at,
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    if indicators.is_empty() {
        return Err(NormalizeError::Empty);
    }
    indicators.sort_by_key(|indicator| indicator.date);
    Ok(indicators)
}

fn is_missing_marker(text: &str) -> bool {
    let text = text.trim();
    text.is_empty() || text == "."
}
