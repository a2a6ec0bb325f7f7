//! Command line arguments and environment configuration. One immutable value
//! loaded at startup; there is no hot reload.

use anyhow::{ensure, Context, Result};
use std::{net::SocketAddr, num::ParseFloatError, str::FromStr, time::Duration};

use crate::payment::sui::Network;

#[derive(Debug, structopt::StructOpt)]
pub struct Arguments {
    #[structopt(long, env = "LOG_FILTER", default_value = "warn,exchange=debug,model=debug")]
    pub log_filter: String,

    #[structopt(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    pub bind_address: SocketAddr,

    /// Postgres connection string of the ledger.
    #[structopt(long, env = "DATABASE_URL", default_value = "postgresql://")]
    pub db_url: String,

    /// Price per 1000 seconds of account lifetime, paid out of deposits.
    #[structopt(long, env = "ACCOUNT_TTL_PRICE", default_value = "1", parse(try_from_str = parse_price))]
    pub account_ttl_price: f64,

    /// Longest account extension a single deposit may buy, in seconds.
    #[structopt(long, env = "MAX_EXPIRATION_EXTENSION", default_value = "2592000")]
    pub max_expiration_extension: i64,

    /// Most recipients a withdrawal batch transaction may pay.
    #[structopt(long, env = "WITHDRAW_RECIPIENT_COUNT", default_value = "8")]
    pub withdraw_recipient_count: i64,

    /// Most processing batches one reconciliation call may poll.
    #[structopt(long, env = "WITHDRAW_CHECK_STATUS_COUNT", default_value = "16")]
    pub withdraw_check_status_count: i64,

    /// Mnemonic of the platform wallet deposits are paid into.
    #[structopt(long, env = "WALLET_MNEMONIC", hide_env_values = true)]
    pub wallet_mnemonic: String,

    #[structopt(long, env = "SUI_NETWORK", default_value = "localnet")]
    pub sui_network: Network,

    /// 32 byte hex seed of the token signing key.
    #[structopt(long, env = "TOKEN_SIGNING_SEED", hide_env_values = true, parse(try_from_str = parse_seed))]
    pub token_signing_seed: Seed,

    #[structopt(long, env = "ADMIN_USERNAME", default_value = "admin")]
    pub admin_username: String,

    #[structopt(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: String,

    /// How long a handed out challenge stays signable.
    #[structopt(long, env = "MESSAGE_AUTH_TIMEOUT", default_value = "300", parse(try_from_str = duration_from_seconds))]
    pub message_auth_timeout: Duration,

    /// Lifetime of session tokens.
    #[structopt(long, env = "SESSION_TIMEOUT", default_value = "3600", parse(try_from_str = duration_from_seconds))]
    pub session_timeout: Duration,

    /// How many epochs old a deposit transaction may be.
    #[structopt(long, env = "MAX_DEPOSIT_EPOCH_GAP", default_value = "4")]
    pub max_deposit_epoch_gap: i64,

    /// Refresh period of the per account free quota allowance.
    #[structopt(long, env = "FREE_QUOTA_REFRESH_PERIOD", default_value = "3600", parse(try_from_str = duration_from_seconds))]
    pub free_quota_refresh_period: Duration,

    /// Free quota units granted per account and refresh period.
    #[structopt(long, env = "FREE_QUOTA_GRANT", default_value = "100")]
    pub free_quota_grant: i64,

    /// Lifetime of tokens bought with balance.
    #[structopt(long, env = "TOKEN_TTL", default_value = "1800", parse(try_from_str = duration_from_seconds))]
    pub token_ttl: Duration,

    #[structopt(long, env = "REDIS_HOST", default_value = "127.0.0.1")]
    pub redis_host: String,

    #[structopt(long, env = "REDIS_PORT", default_value = "6379")]
    pub redis_port: u16,

    #[structopt(long, env = "ENABLE_QUOTA_LIMITER")]
    pub enable_quota_limiter: bool,

    #[structopt(long, env = "ENABLE_SERVICE_REGISTRATION_WHITELIST")]
    pub enable_service_registration_whitelist: bool,

    /// How often the garbage collection loop runs.
    #[structopt(long, env = "MAINTENANCE_INTERVAL", default_value = "600", parse(try_from_str = duration_from_seconds))]
    pub maintenance_interval: Duration,
}

/// A 32 byte hex encoded signing seed. Wrapped so the secret does not leak
/// through Debug output.
#[derive(Clone)]
pub struct Seed(pub [u8; 32]);

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("Seed(..)")
    }
}

fn parse_seed(s: &str) -> Result<Seed> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let mut seed = [0u8; 32];
    hex::decode_to_slice(s, &mut seed).context("expect a 32 byte hex seed")?;
    Ok(Seed(seed))
}

fn parse_price(s: &str) -> Result<f64> {
    let price = f64::from_str(s)?;
    ensure!(price.is_finite() && price >= 0.);
    Ok(price)
}

pub fn duration_from_seconds(s: &str) -> Result<Duration, ParseFloatError> {
    Ok(Duration::from_secs_f32(s.parse()?))
}
