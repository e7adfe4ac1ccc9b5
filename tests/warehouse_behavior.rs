//! Behavior-driven tests for the local database
//!
//! These tests verify idempotent upserts, the audit log and backups as a
//! user of the warehouse observes them.

use std::path::Path;
use std::thread;
use std::time::Duration;

use finfeed_warehouse::{
    IndicatorRow, MarketDataQuery, MarketDataRow, Warehouse, WarehouseConfig, WarehouseError,
};
use tempfile::tempdir;

fn open(home: &Path) -> Warehouse {
    Warehouse::open(WarehouseConfig {
        finfeed_home: home.to_path_buf(),
        db_path: home.join("finfeed.duckdb"),
        max_pool_size: 2,
    })
    .expect("warehouse open")
}

fn row(symbol: &str, date: &str, close: f64) -> MarketDataRow {
    MarketDataRow {
        symbol: symbol.to_string(),
        market: "BR".to_string(),
        date: date.to_string(),
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1_000,
        data_type: "stock".to_string(),
        last_updated: "2024-03-05T10:00:00Z".to_string(),
    }
}

fn query(symbol: &str) -> MarketDataQuery {
    MarketDataQuery {
        symbol: symbol.to_string(),
        market: Some("BR".to_string()),
        data_type: "stock".to_string(),
        start: None,
        end: None,
    }
}

// =============================================================================
// Warehouse: Idempotent upserts
// =============================================================================

#[test]
fn when_the_same_batch_is_written_twice_row_count_is_unchanged() {
    // Given: a warehouse holding one batch
    let temp = tempdir().expect("tempdir");
    let warehouse = open(temp.path());
    let batch = vec![row("PETR4", "2024-03-01", 36.8), row("PETR4", "2024-03-04", 37.0)];
    warehouse
        .upsert_market_data("b3", "req-001", &batch, 40)
        .expect("first upsert");

    // When: the identical batch arrives again
    warehouse
        .upsert_market_data("b3", "req-002", &batch, 35)
        .expect("second upsert");

    // Then: no duplicates exist
    assert_eq!(warehouse.market_data_row_count().expect("count"), 2);
}

#[test]
fn when_a_day_is_refetched_the_latest_values_win() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open(temp.path());
    warehouse
        .upsert_market_data("b3", "req-001", &[row("PETR4", "2024-03-01", 36.8)], 0)
        .expect("first");
    warehouse
        .upsert_market_data("b3", "req-002", &[row("PETR4", "2024-03-01", 38.2)], 0)
        .expect("second");

    let rows = warehouse.query_market_data(&query("PETR4")).expect("query");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].close, 38.2);
    assert_eq!(rows[0].date, "2024-03-01");
}

#[test]
fn the_same_day_under_another_data_type_is_a_separate_row() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open(temp.path());
    let mut fii = row("HGLG11", "2024-03-01", 160.0);
    fii.data_type = "fii".to_string();

    warehouse
        .upsert_market_data("b3", "req-001", &[row("HGLG11", "2024-03-01", 160.0), fii], 0)
        .expect("upsert");

    assert_eq!(warehouse.market_data_row_count().expect("count"), 2);
}

#[test]
fn malformed_dates_are_rejected_and_nothing_is_written() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open(temp.path());

    let result = warehouse.upsert_market_data(
        "b3",
        "req-001",
        &[row("PETR4", "2024-03-01", 36.8), row("PETR4", "01/03/2024", 36.8)],
        0,
    );

    assert!(matches!(result, Err(WarehouseError::InvalidRow(_))));
    assert_eq!(warehouse.market_data_row_count().expect("count"), 0);
}

#[test]
fn concurrent_writers_leave_exactly_one_row_per_key() {
    // Given: sixteen writers sharing one warehouse
    let temp = tempdir().expect("tempdir");
    let warehouse = open(temp.path());

    // When: each repeatedly upserts the same PETR4 day and one day of its own,
    // reading back between writes
    let writers: Vec<_> = (0..16u32)
        .map(|writer| {
            let warehouse = warehouse.clone();
            thread::spawn(move || {
                let own_day = format!("2023-01-{:02}", writer + 1);
                for round in 0..10u32 {
                    let close = 36.0 + f64::from(round);
                    let batch = [row("PETR4", "2024-03-01", close), row("VALE3", &own_day, close)];
                    warehouse
                        .upsert_market_data("b3", &format!("req-{writer}-{round}"), &batch, 0)
                        .expect("upsert");
                    let rows = warehouse.query_market_data(&query("PETR4")).expect("query");
                    assert_eq!(rows.len(), 1);
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().expect("writer thread");
    }

    // Then: one shared row plus one row per writer, and a complete audit log
    assert_eq!(warehouse.market_data_row_count().expect("count"), 17);
    let shared = warehouse.query_market_data(&query("PETR4")).expect("query");
    assert_eq!(shared[0].close, 45.0);
    assert_eq!(warehouse.ingest_log().expect("log").len(), 160);
}

// =============================================================================
// Warehouse: Queries
// =============================================================================

#[test]
fn window_bounds_are_inclusive_and_results_are_date_ordered() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open(temp.path());
    warehouse
        .upsert_market_data(
            "b3",
            "req-001",
            &[
                row("VALE3", "2024-03-05", 60.0),
                row("VALE3", "2024-03-01", 58.0),
                row("VALE3", "2024-03-04", 59.0),
                row("VALE3", "2024-02-28", 57.0),
            ],
            0,
        )
        .expect("upsert");

    let mut windowed = query("VALE3");
    windowed.start = Some("2024-03-01".to_string());
    windowed.end = Some("2024-03-04".to_string());
    let rows = warehouse.query_market_data(&windowed).expect("query");

    let dates: Vec<_> = rows.iter().map(|row| row.date.as_str()).collect();
    assert_eq!(dates, ["2024-03-01", "2024-03-04"]);
}

// =============================================================================
// Warehouse: Audit log
// =============================================================================

#[test]
fn every_batch_leaves_one_audit_entry() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open(temp.path());
    warehouse
        .upsert_market_data(
            "alphavantage",
            "req-001",
            &[row("IBM", "2024-03-01", 187.9), row("IBM", "2024-03-01", 188.0)],
            120,
        )
        .expect("market data");
    warehouse
        .upsert_indicators(
            "bcb",
            "req-002",
            &[IndicatorRow {
                country: "BR".to_string(),
                indicator_name: "selic".to_string(),
                date: "2024-03-20".to_string(),
                value: 10.75,
                last_updated: "2024-03-21T00:00:00Z".to_string(),
            }],
        )
        .expect("indicators");

    let log = warehouse.ingest_log().expect("log");
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].source, "alphavantage");
    assert_eq!(log[0].dataset, "market_data");
    assert_eq!(log[0].row_count, 1, "duplicate keys collapse before counting");
    assert_eq!(log[1].dataset, "economic_indicators");
    assert!(log.iter().all(|entry| entry.status == "ok"));
}

// =============================================================================
// Warehouse: Backups
// =============================================================================

#[test]
fn backup_copies_the_database_with_its_data() {
    // Given: a warehouse with rows
    let temp = tempdir().expect("tempdir");
    let warehouse = open(temp.path());
    warehouse
        .upsert_market_data("b3", "req-001", &[row("PETR4", "2024-03-01", 36.8)], 0)
        .expect("upsert");

    // When: a backup is taken
    let backup_dir = temp.path().join("backups");
    let path = warehouse.backup(&backup_dir).expect("backup");

    // Then: the copy opens and holds the same rows
    assert!(path.starts_with(&backup_dir));
    let name = path.file_name().expect("name").to_string_lossy().into_owned();
    assert!(name.starts_with("finfeed_backup_"), "{name}");
    assert!(name.ends_with(".duckdb"), "{name}");

    let restored_home = tempdir().expect("tempdir");
    let restored = Warehouse::open(WarehouseConfig {
        finfeed_home: restored_home.path().to_path_buf(),
        db_path: path,
        max_pool_size: 1,
    })
    .expect("open backup");
    assert_eq!(restored.market_data_row_count().expect("count"), 1);
}

#[test]
fn scheduled_backup_runs_only_when_due() {
    let temp = tempdir().expect("tempdir");
    let warehouse = open(temp.path());
    let backup_dir = temp.path().join("backups");

    let first = warehouse
        .backup_if_due(&backup_dir, Duration::from_secs(7 * 24 * 3600))
        .expect("first");
    assert!(first.is_some(), "no previous backup means one is due");

    let second = warehouse
        .backup_if_due(&backup_dir, Duration::from_secs(7 * 24 * 3600))
        .expect("second");
    assert!(second.is_none(), "a fresh backup suppresses the next one");

    let forced = warehouse
        .backup_if_due(&backup_dir, Duration::ZERO)
        .expect("zero frequency");
    assert!(forced.is_some());
}
