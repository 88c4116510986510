//! Server configuration

use crate::error::BoxError;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Redis connection URL (analytics + payment reference store)
    pub redis_url: String,
    /// HTTP port
    pub http_port: u16,
    /// Number of queue workers
    pub worker_count: usize,
    /// Probability in [0, 1] that a simulated refund call fails
    pub gateway_failure_rate: f64,
    /// Environment: development | staging | production
    pub environment: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, BoxError> {
        let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            worker_count: std::env::var("WORKER_COUNT")
                .ok()
                .and_then(|n| n.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(4),
            gateway_failure_rate: std::env::var("GATEWAY_FAILURE_RATE")
                .ok()
                .and_then(|r| r.parse().ok())
                .filter(|r| (0.0..=1.0).contains(r))
                .unwrap_or(crate::payment::DEFAULT_FAILURE_RATE),
            environment,
        })
    }
}
