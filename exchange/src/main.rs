use anyhow::{Context, Result};
use chrono::Duration;
use exchange::{
    arguments::Arguments,
    auth::Auth,
    database::Database,
    exchange::{Exchange, Settings},
    payment::sui::SuiPaymentClient,
    quota_token::QuotaTokenMinter,
    ratelimit::RedisRateLimitStore,
    serve_task,
};
use std::sync::Arc;
use structopt::StructOpt;
use tokio::task;
use tracing_subscriber::EnvFilter;

async fn maintenance_task(exchange: Arc<Exchange>, interval: std::time::Duration) -> ! {
    loop {
        tokio::time::sleep(interval).await;
        tracing::debug!("running exchange maintenance");
        if let Err(err) = exchange.run_maintenance().await {
            tracing::error!(?err, "maintenance failed");
        }
    }
}

fn chrono_duration(duration: std::time::Duration) -> Result<Duration> {
    Duration::from_std(duration).context("duration out of range")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Arguments::from_args();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log_filter))
        .with_ansi(false)
        .init();
    tracing::info!(
        bind_address = %args.bind_address,
        network = ?args.sui_network,
        "starting the quota exchange"
    );

    let database = Database::new(&args.db_url).context("cannot connect to the ledger")?;
    let payment = Arc::new(
        SuiPaymentClient::new(args.sui_network, &args.wallet_mnemonic)
            .context("cannot initialize the payment client")?,
    );
    let rate_limits = Arc::new(
        RedisRateLimitStore::new(&args.redis_host, args.redis_port)
            .await
            .context("cannot initialize the rate limit store")?,
    );
    let auth = Auth::new(
        args.token_signing_seed.0,
        chrono_duration(args.message_auth_timeout)?,
        chrono_duration(args.session_timeout)?,
    )?;
    let minter = QuotaTokenMinter::new(args.token_signing_seed.0)?;
    tracing::info!(key_id = minter.key_id(), "advertising token signing key");

    let settings = Settings {
        account_ttl_price: args.account_ttl_price,
        max_expiration_extension: args.max_expiration_extension,
        withdraw_recipient_count: args.withdraw_recipient_count,
        withdraw_check_status_count: args.withdraw_check_status_count,
        max_deposit_epoch_gap: args.max_deposit_epoch_gap,
        free_quota_refresh_period: chrono_duration(args.free_quota_refresh_period)?,
        free_quota_grant: args.free_quota_grant,
        token_ttl: chrono_duration(args.token_ttl)?,
        network: format!("{:?}", args.sui_network).to_lowercase(),
        enable_quota_limiter: args.enable_quota_limiter,
        enable_service_registration_whitelist: args.enable_service_registration_whitelist,
    };
    let exchange = Arc::new(
        Exchange::initialize(
            database,
            auth,
            minter,
            payment,
            rate_limits,
            settings,
            &args.admin_username,
            &args.admin_password,
        )
        .await
        .context("cannot initialize the exchange")?,
    );

    let serve = serve_task(exchange.clone(), args.bind_address);
    let maintenance = task::spawn(maintenance_task(exchange, args.maintenance_interval));
    tokio::select! {
        result = serve => tracing::error!(?result, "serve task exited"),
        result = maintenance => tracing::error!(?result, "maintenance task exited"),
    };
    Ok(())
}
