use std::env;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::broker::{BrokerEndpoint, ConsumerSettings};
use crate::database::DatabaseConnection;

/// Errors raised while loading or reading configuration.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The configuration sources could not be loaded or merged.
    #[error("unable to load configuration")]
    Load { source: ConfigError },

    /// A named section is missing or does not match its schema.
    #[error("unable to read {section:?} settings section")]
    Section { section: String, source: ConfigError },
}

/// Typed view of the `broker` configuration section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BrokerSettings {
    pub connection: BrokerEndpoint,
    pub consumer: ConsumerSettings,
}

/// Layered configuration with per-section readers.
///
/// Sections are deserialized independently on demand rather than all at
/// once, so one service can read only the sections it needs and a schema
/// problem is reported against the exact section at fault. There are no
/// built-in defaults for required sections: a missing section is an error,
/// never a silently empty struct.
#[derive(Debug, Clone)]
pub struct Settings {
    config: Config,
}

impl Settings {
    /// Layered settings: `config/default`, then `config/{RUN_MODE}`, then
    /// environment variables (`DATABASE_SERVER`, `BROKER_CONNECTION_HOST`,
    /// and so on).
    pub fn new() -> Result<Self, SettingsError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            )
            .build()
            .map_err(|source| SettingsError::Load { source })?;

        Ok(Self { config })
    }

    /// Settings parsed from a raw JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, SettingsError> {
        let config = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Json))
            .build()
            .map_err(|source| SettingsError::Load { source })?;

        Ok(Self { config })
    }

    /// Settings read from a JSON file on disk. The file is required;
    /// startup aborts when it is missing or malformed.
    pub fn from_json_file(path: &str) -> Result<Self, SettingsError> {
        let config = Config::builder()
            .add_source(File::new(path, FileFormat::Json))
            .build()
            .map_err(|source| SettingsError::Load { source })?;

        Ok(Self { config })
    }

    /// The `database` section.
    pub fn database(&self) -> Result<DatabaseConnection, SettingsError> {
        self.section("database")
    }

    /// The `broker` section.
    ///
    /// The `connection` and `consumer` sub-sections are read independently
    /// so an error names the exact sub-section at fault.
    pub fn broker(&self) -> Result<BrokerSettings, SettingsError> {
        Ok(BrokerSettings {
            connection: self.section("broker.connection")?,
            consumer: self.section("broker.consumer")?,
        })
    }

    /// Any named section, deserialized on its own.
    pub fn section<T: DeserializeOwned>(&self, section: &str) -> Result<T, SettingsError> {
        self.config
            .get(section)
            .map_err(|source| SettingsError::Section {
                section: section.to_string(),
                source,
            })
    }
}
