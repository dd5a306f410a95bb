mod config;
mod daemon;
mod ops;
mod rate_limiter;

pub use config::{
  ConfigError, LimitsSection, LoggingSection, PortsSection, ServerConfig, ServerSection,
};
pub use daemon::Daemon;
pub use ops::{cache_stats, health, router, HealthReport, OpsServer, RemoteHealth};
pub use rate_limiter::{MessageBudget, RateLimitError, RateLimiter};
