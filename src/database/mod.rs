//! Relational database access.
//!
//! A [`DatabaseConnection`] describes one database and opens a driver pool
//! lazily on first use. The pool is cached for the lifetime of the object
//! and never invalidated automatically; there is no health check between
//! calls. The driver defers socket establishment to the first query, so a
//! successful [`handle`](DatabaseConnection::handle) call does not prove the
//! database is reachable.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use thiserror::Error;
use tokio::sync::OnceCell;

/// Errors raised while preparing a database handle.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The configured driver is not one this crate links against.
    #[error("unsupported database driver {0:?}")]
    UnsupportedDriver(String),
}

/// Connection descriptor plus the lazily opened driver pool.
///
/// Deserialized straight from the `database` configuration section. The
/// descriptor fields never change after construction; the cached pool is the
/// only mutable part and only ever goes from empty to populated.
#[derive(Debug, Deserialize)]
pub struct DatabaseConnection {
    pub server: String,
    pub port: u16,
    pub user_id: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_acquire_timeout_seconds")]
    pub acquire_timeout_seconds: u64,
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
    #[serde(skip)]
    pool: OnceCell<PgPool>,
}

fn default_driver() -> String {
    "postgres".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_acquire_timeout_seconds() -> u64 {
    30
}

fn default_idle_timeout_seconds() -> u64 {
    600
}

impl DatabaseConnection {
    /// Descriptor with the default driver and pool sizing.
    pub fn new(
        server: impl Into<String>,
        port: u16,
        user_id: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            port,
            user_id: user_id.into(),
            password: password.into(),
            database: database.into(),
            driver: default_driver(),
            pool_size: default_pool_size(),
            acquire_timeout_seconds: default_acquire_timeout_seconds(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            pool: OnceCell::new(),
        }
    }

    /// Canonical keyword/value DSN for this descriptor.
    ///
    /// Pure and total: the same fields always produce the same string, and
    /// no I/O happens here. The returned DSN contains the raw password; use
    /// the `Display` impl when logging.
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} sslmode=disable",
            self.server, self.port, self.user_id, self.password, self.database
        )
    }

    /// The driver pool, opened on the first call and cached afterwards.
    ///
    /// Sequential calls on the same instance return the same pool, never a
    /// fresh one. The pool connects lazily, so this succeeds even when the
    /// database is down; the first query surfaces connectivity problems.
    pub async fn handle(&self) -> Result<&PgPool, DatabaseError> {
        self.pool.get_or_try_init(|| self.open()).await
    }

    async fn open(&self) -> Result<PgPool, DatabaseError> {
        if !matches!(self.driver.as_str(), "postgres" | "postgresql") {
            return Err(DatabaseError::UnsupportedDriver(self.driver.clone()));
        }

        let options = PgConnectOptions::new()
            .host(&self.server)
            .port(self.port)
            .username(&self.user_id)
            .password(&self.password)
            .database(&self.database)
            .ssl_mode(PgSslMode::Disable);

        let pool = PgPoolOptions::new()
            .max_connections(self.pool_size)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_seconds))
            .idle_timeout(Duration::from_secs(self.idle_timeout_seconds))
            .connect_lazy_with(options);

        tracing::info!(
            database = %self,
            pool_size = self.pool_size,
            "Database connection pool created"
        );
        Ok(pool)
    }
}

impl fmt::Display for DatabaseConnection {
    /// Redacted DSN, safe for logs and errors.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "host={} port={} user={} password=*** dbname={} sslmode=disable",
            self.server, self.port, self.user_id, self.database
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_connection() -> DatabaseConnection {
        DatabaseConnection::new("db1", 5432, "u", "p", "mydb")
    }

    #[test]
    fn test_connection_string_canonical_form() {
        assert_eq!(
            create_test_connection().connection_string(),
            "host=db1 port=5432 user=u password=p dbname=mydb sslmode=disable"
        );
    }

    #[test]
    fn test_connection_string_is_pure() {
        let connection = create_test_connection();
        assert_eq!(
            connection.connection_string(),
            connection.connection_string()
        );
    }

    #[test]
    fn test_display_masks_password() {
        let connection = DatabaseConnection::new("db1", 5432, "u", "s3cret", "mydb");
        let shown = connection.to_string();
        assert!(!shown.contains("s3cret"));
        assert!(shown.contains("password=***"));
    }

    #[tokio::test]
    async fn test_handle_is_cached() {
        let connection = create_test_connection();
        let first = connection.handle().await.unwrap();
        let second = connection.handle().await.unwrap();
        assert!(std::ptr::eq(first, second), "handle must reuse the cached pool");
    }

    #[tokio::test]
    async fn test_handle_succeeds_without_reachable_database() {
        // The pool opens lazily; no socket is established here.
        let connection = DatabaseConnection::new("nowhere.invalid", 5432, "u", "p", "mydb");
        assert!(connection.handle().await.is_ok());
    }

    #[tokio::test]
    async fn test_unsupported_driver_is_rejected() {
        let mut connection = create_test_connection();
        connection.driver = "mysql".to_string();
        let error = connection.handle().await.unwrap_err();
        assert_eq!(error.to_string(), "unsupported database driver \"mysql\"");
    }

    #[tokio::test]
    async fn test_postgresql_driver_alias_is_accepted() {
        let mut connection = create_test_connection();
        connection.driver = "postgresql".to_string();
        assert!(connection.handle().await.is_ok());
    }

    #[test]
    fn test_deserializes_with_defaults() {
        let connection: DatabaseConnection = serde_json::from_value(serde_json::json!({
            "server": "db1",
            "port": 5432,
            "user_id": "u",
            "password": "p",
            "database": "mydb"
        }))
        .unwrap();
        assert_eq!(connection.driver, "postgres");
        assert_eq!(connection.pool_size, 10);
        assert_eq!(connection.acquire_timeout_seconds, 30);
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let result: Result<DatabaseConnection, _> = serde_json::from_value(serde_json::json!({
            "server": "db1",
            "port": 5432,
            "password": "p",
            "database": "mydb"
        }));
        assert!(result.is_err());
    }
}
