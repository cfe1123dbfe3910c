// Infrastructure access (shared components)
pub mod broker;
pub mod config;
pub mod database;
pub mod error;

// Application composition
pub mod app;

// Supporting modules
pub mod telemetry;

// Re-export the types most callers touch
pub use app::App;
pub use broker::{BrokerEndpoint, Consumer, ConsumerSettings, Publisher, QueueSettings};
pub use config::Settings;
pub use database::DatabaseConnection;
pub use error::{Error, Result};
