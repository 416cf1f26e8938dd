//! Configuration: CLI flags point at a plaintext config TOML and a
//! secrets TOML; both deserialize strictly and assemble into the runtime
//! [`Ctx`] everything else is constructed from. No global state, no
//! credentials baked into code.

use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy::primitives::Address;
use clap::Parser;
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::Level;
use url::Url;

#[derive(Parser, Debug)]
pub struct Env {
    /// Path to plaintext TOML configuration file
    #[clap(long)]
    pub config: PathBuf,
    /// Path to TOML secrets file
    #[clap(long)]
    pub secrets: PathBuf,
}

/// Non-secret settings deserialized from the plaintext config TOML.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Config {
    database_url: String,
    log_level: Option<LogLevel>,
    evm: EvmConfig,
    scheduler: Option<SchedulerConfig>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EvmConfig {
    rpc_url: Url,
    tbtc_system: Address,
    keep_bonding: Address,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SchedulerConfig {
    collateral_interval_secs: Option<u64>,
    balance_interval_secs: Option<u64>,
    call_timeout_secs: Option<u64>,
    rpc_fan_out: Option<usize>,
}

/// Secret credentials deserialized from the secrets TOML.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Secrets {
    telegram: TelegramSecrets,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TelegramSecrets {
    bot_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<&LogLevel> for Level {
    fn from(log_level: &LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Combined runtime context, assembled from config and secrets.
#[derive(Debug, Clone)]
pub struct Ctx {
    pub(crate) database_url: String,
    pub log_level: LogLevel,
    pub(crate) evm: EvmCtx,
    pub(crate) scheduler: SchedulerCtx,
    pub(crate) telegram: TelegramCtx,
}

#[derive(Debug, Clone)]
pub(crate) struct EvmCtx {
    pub(crate) rpc_url: Url,
    pub(crate) tbtc_system: Address,
    pub(crate) keep_bonding: Address,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SchedulerCtx {
    pub(crate) collateral_interval: Duration,
    pub(crate) balance_interval: Duration,
    pub(crate) call_timeout: Duration,
    pub(crate) rpc_fan_out: usize,
}

#[derive(Clone)]
pub(crate) struct TelegramCtx {
    pub(crate) bot_token: String,
}

impl std::fmt::Debug for TelegramCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramCtx")
            .field("bot_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML")]
    Toml(#[from] toml::de::Error),
    #[error("telegram bot token is empty")]
    EmptyBotToken,
}

impl Ctx {
    pub fn load_files(config: &Path, secrets: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(config)?;
        let secrets_str = std::fs::read_to_string(secrets)?;
        Self::from_toml(&config_str, &secrets_str)
    }

    pub fn from_toml(config_toml: &str, secrets_toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(config_toml)?;
        let secrets: Secrets = toml::from_str(secrets_toml)?;

        if secrets.telegram.bot_token.is_empty() {
            return Err(ConfigError::EmptyBotToken);
        }

        let scheduler = config.scheduler.unwrap_or_default();

        Ok(Self {
            database_url: config.database_url,
            log_level: config.log_level.unwrap_or(LogLevel::Info),
            evm: EvmCtx {
                rpc_url: config.evm.rpc_url,
                tbtc_system: config.evm.tbtc_system,
                keep_bonding: config.evm.keep_bonding,
            },
            scheduler: SchedulerCtx {
                collateral_interval: Duration::from_secs(
                    scheduler.collateral_interval_secs.unwrap_or(300),
                ),
                balance_interval: Duration::from_secs(
                    scheduler.balance_interval_secs.unwrap_or(60),
                ),
                call_timeout: Duration::from_secs(scheduler.call_timeout_secs.unwrap_or(30)),
                rpc_fan_out: scheduler.rpc_fan_out.unwrap_or(8),
            },
            telegram: TelegramCtx {
                bot_token: secrets.telegram.bot_token,
            },
        })
    }

    pub async fn get_sqlite_pool(&self) -> Result<SqlitePool, sqlx::Error> {
        configure_sqlite_pool(&self.database_url).await
    }
}

pub(crate) async fn configure_sqlite_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePool::connect(database_url).await?;

    // WAL allows the two cycle loops to read while the other writes;
    // SQLite still serializes writers.
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    // Wait out a blocked write instead of failing immediately with
    // "database is locked". Transactions stay short, so 10s is plenty.
    sqlx::query("PRAGMA busy_timeout = 10000")
        .execute(&pool)
        .await?;

    Ok(pool)
}
