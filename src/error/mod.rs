use thiserror::Error;

use crate::broker::BrokerError;
use crate::config::SettingsError;
use crate::database::DatabaseError;

/// Top-level error for callers that wire several subsystems together.
///
/// Subsystem errors convert into this automatically, so application code can
/// use one `Result` type end to end and still match on the subsystem when it
/// needs to.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] SettingsError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

pub type Result<T> = std::result::Result<T, Error>;
