use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

use crate::store::DEFAULT_OPERATION_TIMEOUT;

#[derive(Debug, Clone, Deserialize)]
pub struct IamConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub mongodb: MongoConfig,
    pub store: StoreConfig,
    pub session: SessionConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub operation_timeout_secs: u64,
}

impl StoreConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub jwt_secret: Secret<String>,
    pub audience: String,
    pub ttl_hours: i64,
}

/// Basic-auth credential for operator-only routes (session minting).
#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    pub username: String,
    pub password: Secret<String>,
}

impl IamConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common_config = core_config::Config::load()?;

        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";
        let default_timeout = DEFAULT_OPERATION_TIMEOUT.as_secs().to_string();

        Ok(IamConfig {
            common: common_config,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("iam"), is_prod)?,
                collection: get_env("MONGODB_COLLECTION", Some("entities"), is_prod)?,
            },
            store: StoreConfig {
                backend: get_env("STORE_BACKEND", Some("mongo"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                operation_timeout_secs: parse_env(
                    "STORE_TIMEOUT_SECS",
                    get_env("STORE_TIMEOUT_SECS", Some(&default_timeout), is_prod)?,
                )?,
            },
            session: SessionConfig {
                jwt_secret: Secret::new(get_env(
                    "JWT_SECRET",
                    Some("dev-secret-change-me"),
                    is_prod,
                )?),
                audience: get_env("JWT_AUDIENCE", Some("iam-service"), is_prod)?,
                ttl_hours: parse_env(
                    "SESSION_TTL_HOURS",
                    get_env("SESSION_TTL_HOURS", Some("48"), is_prod)?,
                )?,
            },
            admin: AdminConfig {
                username: get_env("ADMIN_USER", Some("admin"), is_prod)?,
                password: Secret::new(get_env(
                    "ADMIN_PASSWORD",
                    Some("dev-admin-change-me"),
                    is_prod,
                )?),
            },
        })
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, raw: String) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} has invalid value `{}`: {}", key, raw, e))
    })
}
