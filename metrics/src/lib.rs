pub mod config;
pub mod http;
pub mod relay;

pub use config::MetricsConfig;
pub use http::MetricsServer;
pub use relay::RelayMetrics;
