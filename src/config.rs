use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{DEFAULT_FARM_NAME, FarmName};
use crate::domain::species::DEFAULT_SECONDS_PER_SIM_YEAR;

const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8079";
const DEFAULT_PRODUCTION_INTERVAL_MS: u64 = 2_000;
const DEFAULT_LIFECYCLE_INTERVAL_MS: u64 = 10_000;
const DEFAULT_REGISTRATION_BALANCE: Decimal = dec!(1000);
const DEFAULT_RESET_BALANCE: Decimal = dec!(5000);
const DEFAULT_TRANSACTION_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub http_bind_address: SocketAddr,
    pub production_interval_ms: u64,
    pub lifecycle_interval_ms: u64,
    pub registration_balance: Decimal,
    pub reset_balance: Decimal,
    pub default_farm_name: String,
    pub seconds_per_sim_year: u32,
    pub transaction_max_attempts: u32,
    pub graceful_shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_bind_address: default_bind_address(),
            production_interval_ms: DEFAULT_PRODUCTION_INTERVAL_MS,
            lifecycle_interval_ms: DEFAULT_LIFECYCLE_INTERVAL_MS,
            registration_balance: DEFAULT_REGISTRATION_BALANCE,
            reset_balance: DEFAULT_RESET_BALANCE,
            default_farm_name: DEFAULT_FARM_NAME.to_string(),
            seconds_per_sim_year: DEFAULT_SECONDS_PER_SIM_YEAR,
            transaction_max_attempts: DEFAULT_TRANSACTION_MAX_ATTEMPTS,
            graceful_shutdown_timeout_secs: DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    /// CLI flags (and their env fallbacks) win over the config file, which
    /// wins over built-in defaults.
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            http_bind: cli_http_bind,
            production_interval_ms: cli_production_interval_ms,
            lifecycle_interval_ms: cli_lifecycle_interval_ms,
            registration_balance: cli_registration_balance,
            reset_balance: cli_reset_balance,
            default_farm_name: cli_default_farm_name,
            seconds_per_sim_year: cli_seconds_per_sim_year,
            transaction_max_attempts: cli_transaction_max_attempts,
            graceful_shutdown_timeout_secs: cli_graceful_shutdown_timeout_secs,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            http_bind: file_http_bind,
            production_interval_ms: file_production_interval_ms,
            lifecycle_interval_ms: file_lifecycle_interval_ms,
            registration_balance: file_registration_balance,
            reset_balance: file_reset_balance,
            default_farm_name: file_default_farm_name,
            seconds_per_sim_year: file_seconds_per_sim_year,
            transaction_max_attempts: file_transaction_max_attempts,
            graceful_shutdown_timeout_secs: file_graceful_shutdown_timeout_secs,
        } = file_config;

        let defaults = Self::default();

        Ok(Self {
            http_bind_address: cli_http_bind
                .or(file_http_bind)
                .unwrap_or(defaults.http_bind_address),
            production_interval_ms: cli_production_interval_ms
                .or(file_production_interval_ms)
                .unwrap_or(defaults.production_interval_ms),
            lifecycle_interval_ms: cli_lifecycle_interval_ms
                .or(file_lifecycle_interval_ms)
                .unwrap_or(defaults.lifecycle_interval_ms),
            registration_balance: cli_registration_balance
                .or(file_registration_balance)
                .unwrap_or(defaults.registration_balance),
            reset_balance: cli_reset_balance
                .or(file_reset_balance)
                .unwrap_or(defaults.reset_balance),
            default_farm_name: cli_default_farm_name
                .or(file_default_farm_name)
                .map(|name| name.trim().to_string())
                .unwrap_or(defaults.default_farm_name),
            seconds_per_sim_year: cli_seconds_per_sim_year
                .or(file_seconds_per_sim_year)
                .unwrap_or(defaults.seconds_per_sim_year),
            transaction_max_attempts: cli_transaction_max_attempts
                .or(file_transaction_max_attempts)
                .unwrap_or(defaults.transaction_max_attempts),
            graceful_shutdown_timeout_secs: cli_graceful_shutdown_timeout_secs
                .or(file_graceful_shutdown_timeout_secs)
                .unwrap_or(defaults.graceful_shutdown_timeout_secs),
        })
    }

    /// Fail fast on settings the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.production_interval_ms > 0,
            "production interval must be greater than zero"
        );
        anyhow::ensure!(
            self.lifecycle_interval_ms > 0,
            "lifecycle interval must be greater than zero"
        );
        anyhow::ensure!(
            !self.registration_balance.is_sign_negative(),
            "registration balance must not be negative, got {}",
            self.registration_balance
        );
        anyhow::ensure!(
            !self.reset_balance.is_sign_negative(),
            "reset balance must not be negative, got {}",
            self.reset_balance
        );
        FarmName::new(self.default_farm_name.as_str())
            .with_context(|| format!("invalid default farm name {:?}", self.default_farm_name))?;
        anyhow::ensure!(
            self.seconds_per_sim_year > 0,
            "seconds per simulated year must be greater than zero"
        );
        anyhow::ensure!(
            (1..=100).contains(&self.transaction_max_attempts),
            "transaction max attempts must be between 1 and 100, got {}",
            self.transaction_max_attempts
        );
        anyhow::ensure!(
            self.graceful_shutdown_timeout_secs > 0,
            "graceful shutdown timeout must be greater than zero"
        );
        Ok(())
    }

    pub fn production_interval(&self) -> Duration {
        Duration::from_millis(self.production_interval_ms)
    }

    pub fn lifecycle_interval(&self) -> Duration {
        Duration::from_millis(self.lifecycle_interval_ms)
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_timeout_secs)
    }
}

fn default_bind_address() -> SocketAddr {
    DEFAULT_HTTP_BIND
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8079)))
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "farm-ledger",
    about = "Farm economy simulation and ledger service",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "FARM_LEDGER_HTTP_BIND",
        value_name = "ADDR",
        help = "Bind address for the health and metrics endpoints"
    )]
    pub http_bind: Option<SocketAddr>,

    #[arg(
        long,
        env = "FARM_LEDGER_PRODUCTION_INTERVAL_MS",
        value_name = "MS",
        help = "Production scheduler tick interval in milliseconds"
    )]
    pub production_interval_ms: Option<u64>,

    #[arg(
        long,
        env = "FARM_LEDGER_LIFECYCLE_INTERVAL_MS",
        value_name = "MS",
        help = "Lifecycle scheduler tick interval in milliseconds"
    )]
    pub lifecycle_interval_ms: Option<u64>,

    #[arg(
        long,
        env = "FARM_LEDGER_REGISTRATION_BALANCE",
        value_name = "AMOUNT",
        help = "Starting balance for newly registered users"
    )]
    pub registration_balance: Option<Decimal>,

    #[arg(
        long,
        env = "FARM_LEDGER_RESET_BALANCE",
        value_name = "AMOUNT",
        help = "Balance restored by an account reset"
    )]
    pub reset_balance: Option<Decimal>,

    #[arg(
        long,
        env = "FARM_LEDGER_DEFAULT_FARM_NAME",
        value_name = "NAME",
        help = "Name of the farm created at registration and reset"
    )]
    pub default_farm_name: Option<String>,

    #[arg(
        long,
        env = "FARM_LEDGER_SECONDS_PER_SIM_YEAR",
        value_name = "SECS",
        help = "Wall-clock seconds in one simulated year"
    )]
    pub seconds_per_sim_year: Option<u32>,

    #[arg(
        long,
        env = "FARM_LEDGER_TRANSACTION_MAX_ATTEMPTS",
        value_name = "N",
        help = "Attempts per ledger operation before a conflict is surfaced"
    )]
    pub transaction_max_attempts: Option<u32>,

    #[arg(
        long,
        env = "FARM_LEDGER_GRACEFUL_SHUTDOWN_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Upper bound on graceful shutdown"
    )]
    pub graceful_shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    http_bind: Option<SocketAddr>,
    production_interval_ms: Option<u64>,
    lifecycle_interval_ms: Option<u64>,
    registration_balance: Option<Decimal>,
    reset_balance: Option<Decimal>,
    default_farm_name: Option<String>,
    seconds_per_sim_year: Option<u32>,
    transaction_max_attempts: Option<u32>,
    graceful_shutdown_timeout_secs: Option<u64>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
