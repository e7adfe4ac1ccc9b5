use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use time::macros::format_description;
use time::Date;

use super::{
    expect_object, number_field, volume_field, NormalizeContext, NormalizeError,
    PayloadNormalizer, RowCollector,
};
use crate::data_source::RawPayload;
use crate::{parse_iso_date, CanonicalRecord};

const QUOTES_PATH: [&str; 3] = ["TradgFlr", "scty", "SctyQtn"];
const ROW_SELECTOR: &str = "table.table-responsive tr";
const MIN_CELLS: usize = 5;

/// Quotes from the daily fluctuation API.
#[derive(Debug, Clone, Copy, Default)]
pub struct B3JsonNormalizer;

impl PayloadNormalizer for B3JsonNormalizer {
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

        let mut node = body;
        for key in QUOTES_PATH {
            node = node.get(key).ok_or_else(|| NormalizeError::MissingKey {
                key: key.to_owned(),
            })?;
        }
        let quotes = node.as_array().ok_or_else(|| NormalizeError::UnexpectedShape {
            path: QUOTES_PATH.join("."),
            detail: "expected an array".to_owned(),
        })?;

        let mut rows = RowCollector::with_capacity(quotes.len());
        for quote in quotes {
            let quote = expect_object(quote, "SctyQtn[]")?;
            let day = quote
                .get("date")
                .and_then(Value::as_str)
                .ok_or_else(|| NormalizeError::MissingKey {
                    key: "date".to_owned(),
                })?;
            let date = parse_iso_date(day).map_err(|_| NormalizeError::InvalidDate {
                value: day.to_owned(),
            })?;

            rows.push(
                day,
                CanonicalRecord::new(
                    ctx.symbol.clone(),
                    ctx.market,
                    date,
                    number_field(quote, "opnPric")?,
                    number_field(quote, "maxPric")?,
                    number_field(quote, "minPric")?,
                    number_field(quote, "closPric")?,
                    volume_field(quote, "tradQty")?,
                    ctx.data_type,
                    ctx.fetched_at,
                ),
            );
        }

        rows.finish()
    }
}

/// Quotes scraped from the public quotation page.
///
/// Rows with fewer than five cells (headers, spacers) are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct B3HtmlNormalizer;

impl PayloadNormalizer for B3HtmlNormalizer {
    fn normalize(
        &self,
        payload: &RawPayload,
        ctx: &NormalizeContext<'_>,
    ) -> Result<Vec<CanonicalRecord>, NormalizeError> {
        let RawPayload::Html(body) = payload else {
            return Err(NormalizeError::UnsupportedFormat {
                format: payload.format(),
            });
        };

        let rows = selector(ROW_SELECTOR)?;
        let cells = selector("td")?;
        let document = Html::parse_document(body);

        let mut collected = RowCollector::default();
        for row in document.select(&rows) {
            let texts: Vec<String> = row.select(&cells).map(cell_text).collect();
            if texts.len() < MIN_CELLS {
                continue;
            }

            let date = parse_br_date(&texts[0])?;
            collected.push(
                &texts[0],
                CanonicalRecord::new(
                    ctx.symbol.clone(),
                    ctx.market,
                    date,
                    parse_br_number("open", &texts[1])?,
                    parse_br_number("high", &texts[2])?,
                    parse_br_number("low", &texts[3])?,
                    parse_br_number("close", &texts[4])?,
                    0,
                    ctx.data_type,
                    ctx.fetched_at,
                ),
            );
        }

        collected.finish()
    }
}

/// Either B3 transport's payload, dispatched on its format.
#[derive(Debug, Clone, Copy, Default)]
pub struct B3Normalizer {
    json: B3JsonNormalizer,
    html: B3HtmlNormalizer,
}

impl PayloadNormalizer for B3Normalizer {
    fn normalize(
        &self,
        payload: &RawPayload,
        ctx: &NormalizeContext<'_>,
    ) -> Result<Vec<CanonicalRecord>, NormalizeError> {
        match payload {
            RawPayload::Json(_) => self.json.normalize(payload, ctx),
            RawPayload::Html(_) => self.html.normalize(payload, ctx),
        }
    }
}

/// Parses a pt-BR formatted number such as `R$ 1.234,56`.
pub fn parse_br_number(field: &str, text: &str) -> Result<f64, NormalizeError> {
    let cleaned: String = text
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '.')
        .map(|ch| if ch == ',' { '.' } else { ch })
        .collect();

    cleaned
        .parse::<f64>()
        .map_err(|_| NormalizeError::InvalidNumber {
            field: field.to_owned(),
            value: text.trim().to_owned(),
        })
}

fn parse_br_date(text: &str) -> Result<Date, NormalizeError> {
    Date::parse(text.trim(), format_description!("[day]/[month]/[year]")).map_err(|_| {
        NormalizeError::InvalidDate {
            value: text.trim().to_owned(),
        }
    })
}

fn selector(css: &str) -> Result<Selector, NormalizeError> {
    Selector::parse(css).map_err(|err| NormalizeError::UnexpectedShape {
        path: css.to_owned(),
        detail: err.to_string(),
    })
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_owned()
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::date;

    use super::*;
    use crate::{DataType, Market, Symbol, UtcDateTime};

    fn run(
        normalizer: &dyn PayloadNormalizer,
        payload: RawPayload,
        data_type: DataType,
    ) -> Result<Vec<CanonicalRecord>, NormalizeError> {
        let symbol = Symbol::parse("PETR4").expect("symbol");
        let ctx = NormalizeContext {
            symbol: &symbol,
            market: Market::Br,
            data_type,
            fetched_at: UtcDateTime::parse("2024-03-05T12:00:00Z").expect("ts"),
        };
        normalizer.normalize(&payload, &ctx)
    }

    const PAGE: &str = r#"
        <html><body>
        <table class="table-responsive">
          <tr><th>Data</th><th>Abertura</th><th>Máxima</th><th>Mínima</th><th>Fechamento</th></tr>
          <tr><td>04/03/2024</td><td>R$ 1.234,50</td><td>1.240,00</td><td>1.230,10</td><td>1.238,75</td></tr>
          <tr><td>01/03/2024</td><td>36,10</td><td>37,00</td><td>35,90</td><td>36,80</td></tr>
          <tr><td colspan="5">Fonte: B3</td></tr>
        </table>
        </body></html>
    "#;

    #[test]
    fn parses_br_numbers() {
        assert_eq!(parse_br_number("close", "1.234,56").expect("number"), 1234.56);
        assert_eq!(parse_br_number("close", "R$ 36,10").expect("number"), 36.10);
        assert_eq!(parse_br_number("close", "12").expect("number"), 12.0);
        assert!(parse_br_number("close", "n/d").is_err());
    }

    #[test]
    fn html_rows_become_records_with_zero_volume() {
        let records = run(&B3HtmlNormalizer, RawPayload::Html(PAGE.to_owned()), DataType::Stock)
            .expect("normalize");

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].date, date!(2024 - 03 - 01));
        assert_eq!(records[0].close, 36.80);
        assert_eq!(records[1].open, 1234.50);
        assert_eq!(records[1].close, 1238.75);
        assert!(records.iter().all(|record| record.volume == 0));
    }

    #[test]
    fn html_without_table_is_no_data() {
        let err = run(
            &B3HtmlNormalizer,
            RawPayload::Html("<html><p>manutenção</p></html>".to_owned()),
            DataType::Stock,
        )
        .expect_err("must fail");
        assert_eq!(err, NormalizeError::Empty);
    }

    #[test]
    fn json_quotes_are_read_from_nested_list() {
        let body = json!({
            "BizSts": {"cd": "OK"},
            "TradgFlr": {
                "date": "2024-03-04",
                "scty": {
                    "symb": "PETR4",
                    "SctyQtn": [
                        {"date": "2024-03-04", "opnPric": 36.5, "maxPric": 37.2, "minPric": 36.1, "closPric": 37.0, "tradQty": 51200},
                        {"date": "2024-03-01", "opnPric": "36.1", "maxPric": "37.0", "minPric": "35.9", "closPric": "36.8", "tradQty": "48100"}
                    ]
                }
            }
        });

        let records = run(&B3JsonNormalizer, RawPayload::Json(body), DataType::Fii)
            .expect("normalize");

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].date, date!(2024 - 03 - 01));
        assert_eq!(records[0].volume, 48_100);
        assert_eq!(records[1].high, 37.2);
        assert!(records.iter().all(|record| record.data_type == DataType::Fii));
    }

    #[test]
    fn json_without_quote_list_names_the_missing_key() {
        let err = run(
            &B3JsonNormalizer,
            RawPayload::Json(json!({"TradgFlr": {"scty": {}}})),
            DataType::Stock,
        )
        .expect_err("must fail");
        assert_eq!(
            err,
            NormalizeError::MissingKey {
                key: "SctyQtn".to_owned()
            }
        );
    }

    #[test]
    fn both_transports_yield_identical_records() {
        let body = json!({
            "TradgFlr": {"scty": {"SctyQtn": [
                {"date": "2024-03-01", "opnPric": 36.1, "maxPric": 37.0, "minPric": 35.9, "closPric": 36.8}
            ]}}
        });
        let page = r#"<table class="table-responsive">
            <tr><td>01/03/2024</td><td>36,10</td><td>37,00</td><td>35,90</td><td>36,80</td></tr>
        </table>"#;

        let from_json = run(&B3Normalizer::default(), RawPayload::Json(body), DataType::Stock)
            .expect("json");
        let from_html = run(
            &B3Normalizer::default(),
            RawPayload::Html(page.to_owned()),
            DataType::Stock,
        )
        .expect("html");

        assert_eq!(from_json, from_html);
    }

    #[test]
    fn a_bar_outside_its_range_is_skipped_not_fatal() {
        let body = json!({
            "TradgFlr": {"scty": {"SctyQtn": [
                {"date": "2024-03-01", "opnPric": 36.1, "maxPric": 37.0, "minPric": 35.9, "closPric": 36.8},
                {"date": "2024-03-04", "opnPric": 36.5, "maxPric": 37.2, "minPric": 36.1, "closPric": 39.0}
            ]}}
        });

        let records = run(&B3JsonNormalizer, RawPayload::Json(body), DataType::Stock)
            .expect("normalize");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, date!(2024 - 03 - 01));
    }

    #[test]
    fn payload_with_only_invalid_bars_fails() {
        let page = r#"<table class="table-responsive">
            <tr><td>01/03/2024</td><td>36,10</td><td>35,00</td><td>37,90</td><td>36,80</td></tr>
        </table>"#;

        let err = run(&B3HtmlNormalizer, RawPayload::Html(page.to_owned()), DataType::Stock)
            .expect_err("must fail");
        assert!(matches!(err, NormalizeError::InvalidRecord(_)), "{err:?}");
    }
}
