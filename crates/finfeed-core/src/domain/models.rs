use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, Duration as DateDuration};

use crate::{Symbol, UtcDateTime, ValidationError};

/// Trading venue a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    Us,
    Br,
    Forex,
}

impl Market {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Us => "US",
            Self::Br => "BR",
            Self::Forex => "FOREX",
        }
    }
}

impl Display for Market {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "US" => Ok(Self::Us),
            "BR" => Ok(Self::Br),
            "FOREX" | "FX" => Ok(Self::Forex),
            other => Err(ValidationError::InvalidMarket {
                value: other.to_owned(),
            }),
        }
    }
}

/// Instrument family of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Stock,
    Bond,
    /// Brazilian real-estate investment fund.
    Fii,
    Forex,
}

impl DataType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stock => "stock",
            Self::Bond => "bond",
            Self::Fii => "fii",
            Self::Forex => "forex",
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stock" | "stocks" => Ok(Self::Stock),
            "bond" | "bonds" => Ok(Self::Bond),
            "fii" | "fiis" => Ok(Self::Fii),
            "forex" | "fx" => Ok(Self::Forex),
            other => Err(ValidationError::InvalidDataType {
                value: other.to_owned(),
            }),
        }
    }
}

/// US treasury maturities published as yield series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Maturity {
    #[serde(rename = "3month")]
    ThreeMonth,
    #[serde(rename = "2year")]
    TwoYear,
    #[serde(rename = "5year")]
    FiveYear,
    #[serde(rename = "7year")]
    SevenYear,
    #[serde(rename = "10year")]
    TenYear,
    #[serde(rename = "30year")]
    ThirtyYear,
}

impl Maturity {
    pub const ALL: [Self; 6] = [
        Self::ThreeMonth,
        Self::TwoYear,
        Self::FiveYear,
        Self::SevenYear,
        Self::TenYear,
        Self::ThirtyYear,
    ];

    const SERIES_PREFIX: &'static str = "TREASURY_";

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ThreeMonth => "3month",
            Self::TwoYear => "2year",
            Self::FiveYear => "5year",
            Self::SevenYear => "7year",
            Self::TenYear => "10year",
            Self::ThirtyYear => "30year",
        }
    }

    /// Symbol under which the yield series is stored, e.g. `TREASURY_10YEAR`.
    pub fn series_symbol(self) -> Symbol {
        Symbol::from_normalized(format!(
            "{}{}",
            Self::SERIES_PREFIX,
            self.as_str().to_ascii_uppercase()
        ))
    }

    pub fn from_series_symbol(symbol: &Symbol) -> Option<Self> {
        symbol
            .as_str()
            .strip_prefix(Self::SERIES_PREFIX)
            .and_then(|suffix| suffix.parse().ok())
    }
}

impl Display for Maturity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Maturity {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|maturity| maturity.as_str() == normalized)
            .ok_or(ValidationError::InvalidMaturity { value: normalized })
    }
}

/// Inclusive calendar-date bounds; either side may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateWindow {
    #[serde(with = "iso_date::option")]
    start: Option<Date>,
    #[serde(with = "iso_date::option")]
    end: Option<Date>,
}

impl DateWindow {
    pub fn new(start: Option<Date>, end: Option<Date>) -> Result<Self, ValidationError> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(ValidationError::InvalidWindow {
                    start: format_iso_date(start),
                    end: format_iso_date(end),
                });
            }
        }
        Ok(Self { start, end })
    }

    /// The `days` calendar days ending at `today`, inclusive.
    pub fn trailing_days(today: Date, days: u32) -> Self {
        let start = today
            .checked_sub(DateDuration::days(i64::from(days)))
            .unwrap_or(Date::MIN);
        Self {
            start: Some(start),
            end: Some(today),
        }
    }

    pub const fn start(&self) -> Option<Date> {
        self.start
    }

    pub const fn end(&self) -> Option<Date> {
        self.end
    }

    pub fn contains(&self, date: Date) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date <= end)
    }
}

/// Normalized, provider-agnostic daily data point.
///
/// Unique per `(symbol, date, data_type)`; refetching a day replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub symbol: Symbol,
    pub market: Market,
    #[serde(with = "iso_date")]
    pub date: Date,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Zero when the upstream does not report volume.
    pub volume: u64,
    pub data_type: DataType,
    pub last_updated: UtcDateTime,
}

impl CanonicalRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        market: Market,
        date: Date,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
        data_type: DataType,
        last_updated: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        validate_non_negative("open", open)?;
        validate_non_negative("high", high)?;
        validate_non_negative("low", low)?;
        validate_non_negative("close", close)?;

        if high < low {
            return Err(ValidationError::InvalidBarRange);
        }

        if open < low || open > high || close < low || close > high {
            return Err(ValidationError::InvalidBarBounds);
        }

        Ok(Self {
            symbol,
            market,
            date,
            open,
            high,
            low,
            close,
            volume,
            data_type,
            last_updated,
        })
    }

    /// A single-valued observation replicated into open/high/low/close.
    pub fn from_value(
        symbol: Symbol,
        market: Market,
        date: Date,
        value: f64,
        data_type: DataType,
        last_updated: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        Self::new(
            symbol,
            market,
            date,
            value,
            value,
            value,
            value,
            0,
            data_type,
            last_updated,
        )
    }

    pub fn key(&self) -> (&Symbol, Date, DataType) {
        (&self.symbol, self.date, self.data_type)
    }
}

/// Scalar macro indicator observation, e.g. a policy rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicIndicator {
    pub country: String,
    pub indicator_name: String,
    #[serde(with = "iso_date")]
    pub date: Date,
    pub value: f64,
    pub last_updated: UtcDateTime,
}

impl EconomicIndicator {
    pub fn new(
        country: impl AsRef<str>,
        indicator_name: impl AsRef<str>,
        date: Date,
        value: f64,
        last_updated: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        let country = country.as_ref().trim().to_ascii_uppercase();
        if country.is_empty() {
            return Err(ValidationError::EmptyIndicatorField { field: "country" });
        }
        let indicator_name = indicator_name.as_ref().trim().to_owned();
        if indicator_name.is_empty() {
            return Err(ValidationError::EmptyIndicatorField {
                field: "indicator_name",
            });
        }
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteValue { field: "value" });
        }

        Ok(Self {
            country,
            indicator_name,
            date,
            value,
            last_updated,
        })
    }
}

pub fn parse_iso_date(value: &str) -> Result<Date, ValidationError> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]")).map_err(|_| {
        ValidationError::InvalidDate {
            value: value.to_owned(),
        }
    })
}

pub fn format_iso_date(date: Date) -> String {
    date.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| date.to_string())
}

fn validate_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}

mod iso_date {
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    use super::{format_iso_date, parse_iso_date};

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_iso_date(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let value = String::deserialize(deserializer)?;
        parse_iso_date(&value).map_err(D::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            date: &Option<Date>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match date {
                Some(date) => serializer.serialize_some(&format_iso_date(*date)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Date>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|value| parse_iso_date(&value).map_err(D::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn stamp() -> UtcDateTime {
        UtcDateTime::parse("2024-03-04T18:00:00Z").expect("timestamp")
    }

    #[test]
    fn rejects_invalid_bar_bounds() {
        let symbol = Symbol::parse("PETR4").expect("symbol");
        let err = CanonicalRecord::new(
            symbol,
            Market::Br,
            date!(2024 - 03 - 01),
            10.0,
            12.0,
            9.0,
            12.5,
            0,
            DataType::Stock,
            stamp(),
        )
        .expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidBarBounds));
    }

    #[test]
    fn single_value_records_replicate_into_ohlc() {
        let record = CanonicalRecord::from_value(
            Maturity::TenYear.series_symbol(),
            Market::Us,
            date!(2024 - 03 - 01),
            4.21,
            DataType::Bond,
            stamp(),
        )
        .expect("record");

        assert_eq!(record.symbol.as_str(), "TREASURY_10YEAR");
        assert_eq!(
            (record.open, record.high, record.low, record.close, record.volume),
            (4.21, 4.21, 4.21, 4.21, 0)
        );
    }

    #[test]
    fn serializes_with_wire_names() {
        let record = CanonicalRecord::new(
            Symbol::parse("EURUSD").expect("symbol"),
            Market::Forex,
            date!(2024 - 03 - 01),
            1.08,
            1.09,
            1.07,
            1.085,
            0,
            DataType::Forex,
            stamp(),
        )
        .expect("record");

        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["market"], "FOREX");
        assert_eq!(json["data_type"], "forex");
        assert_eq!(json["date"], "2024-03-01");
        assert_eq!(json["last_updated"], "2024-03-04T18:00:00Z");
    }

    #[test]
    fn maturity_is_recovered_from_series_symbol() {
        let symbol = Maturity::ThreeMonth.series_symbol();
        assert_eq!(Maturity::from_series_symbol(&symbol), Some(Maturity::ThreeMonth));
        assert_eq!(
            Maturity::from_series_symbol(&Symbol::parse("IBM").expect("symbol")),
            None
        );
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let window =
            DateWindow::new(Some(date!(2024 - 01 - 01)), Some(date!(2024 - 01 - 31))).expect("window");

        assert!(window.contains(date!(2024 - 01 - 01)));
        assert!(window.contains(date!(2024 - 01 - 31)));
        assert!(!window.contains(date!(2024 - 02 - 01)));
        assert!(DateWindow::new(Some(date!(2024 - 02 - 01)), Some(date!(2024 - 01 - 01))).is_err());
    }

    #[test]
    fn indicator_requires_country_and_name() {
        let err = EconomicIndicator::new(" ", "selic", date!(2024 - 01 - 01), 10.5, stamp())
            .expect_err("must fail");
        assert!(matches!(
            err,
            ValidationError::EmptyIndicatorField { field: "country" }
        ));
    }
}
