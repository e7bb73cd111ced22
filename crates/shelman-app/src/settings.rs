//! Environment-derived server settings.
//!
//! Everything operational is tunable from the environment: bind address,
//! credentials, timeouts, size caps, rate-limit thresholds, and the internal
//! networks exempt from blocking. Only `DATABASE_URL` is mandatory.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::AppError;
use shelman_security::{BucketConfig, Cidr, RateLimitConfig};

/// Default internal networks exempt from IP blocking (RFC1918).
const DEFAULT_INTERNAL_NETWORKS: [&str; 3] =
    ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

/// Fully resolved server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Address the HTTP surface binds on.
    pub bind_addr: SocketAddr,
    /// Admin bearer credential; `None` runs the surface open.
    pub admin_token: Option<String>,
    /// Request body cap in bytes.
    pub max_body_bytes: usize,
    /// Whole-request deadline.
    pub request_timeout: Duration,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Networks exempt from blocking and scanner heuristics.
    pub internal_networks: Vec<Cidr>,
    /// Rate-limit thresholds.
    pub rate_limits: RateLimitConfig,
    /// Log level fallback when `RUST_LOG` is unset.
    pub log_level: String,
}

impl ServerSettings {
    /// Resolve settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an [`AppError`] for a missing `DATABASE_URL` or any variable
    /// carrying an unparseable value.
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| AppError::MissingEnv {
                name: "DATABASE_URL",
            })?;

        let bind_addr = optional("SHELMAN_BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()
            .map_err(|err| AppError::InvalidEnv {
                name: "SHELMAN_BIND_ADDR",
                detail: err.to_string(),
            })?;

        let admin_token = optional("SHELMAN_ADMIN_TOKEN").filter(|token| !token.is_empty());

        let max_body_bytes =
            parse_or("SHELMAN_MAX_BODY_BYTES", 10 * 1024 * 1024)?;
        let request_timeout =
            Duration::from_secs(parse_or("SHELMAN_REQUEST_TIMEOUT_SECS", 30)?);

        let cors_origins = optional("SHELMAN_CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let internal_networks = match optional("SHELMAN_INTERNAL_NETWORKS") {
            Some(raw) => parse_networks(&raw)?,
            None => DEFAULT_INTERNAL_NETWORKS
                .iter()
                .map(|net| net.parse())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|detail| AppError::InvalidEnv {
                    name: "SHELMAN_INTERNAL_NETWORKS",
                    detail,
                })?,
        };

        let window = Duration::from_secs(parse_or("SHELMAN_RATE_WINDOW_SECS", 60)?);
        let rate_limits = RateLimitConfig {
            read: BucketConfig {
                burst: parse_or("SHELMAN_RATE_BURST_READ", 300)?,
                replenish_period: window,
            },
            control: BucketConfig {
                burst: parse_or("SHELMAN_RATE_BURST_CONTROL", 60)?,
                replenish_period: window,
            },
            provisioning: BucketConfig {
                burst: parse_or("SHELMAN_RATE_BURST_PROVISIONING", 20)?,
                replenish_period: window,
            },
        };

        let log_level = optional("SHELMAN_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            database_url,
            bind_addr,
            admin_token,
            max_body_bytes,
            request_timeout,
            cors_origins,
            internal_networks,
            rate_limits,
            log_level,
        })
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw.parse::<T>().map_err(|err| AppError::InvalidEnv {
            name,
            detail: err.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_networks(raw: &str) -> Result<Vec<Cidr>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|net| !net.is_empty())
        .map(|net| {
            net.parse::<Cidr>().map_err(|detail| AppError::InvalidEnv {
                name: "SHELMAN_INTERNAL_NETWORKS",
                detail,
            })
        })
        .collect()
}
