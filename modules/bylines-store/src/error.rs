/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A state the schema is supposed to make impossible. Never repaired
    /// silently; the enclosing run goes FAILED and the operator rolls back.
    #[error("Data integrity violation: {0}")]
    Integrity(String),
}
