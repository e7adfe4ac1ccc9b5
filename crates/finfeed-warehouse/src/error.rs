use thiserror::Error;

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A row could not be written because one of its fields is unusable.
    #[error("invalid row: {0}")]
    InvalidRow(String),

    /// A backup file name could not be produced.
    #[error("backup failed: {0}")]
    Backup(String),
}
