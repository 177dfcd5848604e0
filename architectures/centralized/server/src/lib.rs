mod app;
mod config;
mod service;

pub use app::App;
pub use config::{AuthConfig, AuthMode, CollectorConfig, ConfigError};
pub use service::CollectorService;
