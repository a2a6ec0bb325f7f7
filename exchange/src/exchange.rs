//! The orchestrator tying the ledger, authentication, token minting, the
//! payment chain and the rate limit pools together. One incoming call is one
//! ledger transaction; there is no optimistic locking across calls.

use crate::{
    auth::Auth,
    database::{
        self, ClaimOrderTx, CreateOrder, Database, ListFulfilledOrders, MatchOrderTx, StoreError,
        UpsertAccountTx, WithdrawTx,
    },
    error::{Error, Result},
    pagination::{parse_pagination, CursorCodec},
    payment::{PaymentClient, TransactionStatus, TransferInfo},
    quota_token::QuotaTokenMinter,
    ratelimit::{free_quota_key, sold_quota_key, RateLimitStore},
};
use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, Utc};
use model::{
    account::{Account, Privilege},
    order::{ActiveOrder, FulfilledOrder},
    quota_token::QuotaTokenClaims,
    resource,
    service::Service,
    token_policy::TokenPolicy,
    withdrawal::Withdrawal,
    Address,
};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};
use uuid::Uuid;

/// Fixed global id under which the free quota service is registered at
/// startup.
const FREE_QUOTA_SERVICE_GLOBAL_ID: Uuid = Uuid::from_u128(0x6672_6565_2d71_756f_7461_0000_0001);

/// Cost of activating a quota token once.
const QUOTA_STEP: i64 = 1;

/// The slice of the configuration the orchestrator needs.
pub struct Settings {
    pub account_ttl_price: f64,
    pub max_expiration_extension: i64,
    pub withdraw_recipient_count: i64,
    pub withdraw_check_status_count: i64,
    pub max_deposit_epoch_gap: i64,
    pub free_quota_refresh_period: Duration,
    pub free_quota_grant: i64,
    pub token_ttl: Duration,
    pub network: String,
    pub enable_quota_limiter: bool,
    pub enable_service_registration_whitelist: bool,
}

pub struct DepositRequest {
    pub chain_digest: String,
    pub signature: String,
    pub start_time: DateTime<Utc>,
    pub challenge: Vec<u8>,
    pub username: String,
    pub password: String,
    pub ttl_seconds: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct QuotaToken {
    pub token: String,
    pub claims: QuotaTokenClaims,
}

#[derive(Clone, Debug, Serialize)]
pub struct BatchProcessOutcome {
    pub batch_size: i64,
    pub digest: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PaymentMethod {
    pub coin: &'static str,
    pub network: String,
    pub address: Address,
}

pub struct Exchange {
    database: Database,
    auth: Auth,
    minter: QuotaTokenMinter,
    payment: Arc<dyn PaymentClient>,
    rate_limits: Arc<dyn RateLimitStore>,
    cursors: CursorCodec,
    // Loaded once at startup, updated on service create/delete.
    policies: RwLock<HashMap<i64, TokenPolicy>>,
    settings: Settings,
    admin_account_id: i64,
    free_quota_service_id: i64,
}

impl Exchange {
    /// Builds the orchestrator and bootstraps ledger state it depends on: the
    /// admin account, the free quota service and the token policy cache.
    pub async fn initialize(
        database: Database,
        auth: Auth,
        minter: QuotaTokenMinter,
        payment: Arc<dyn PaymentClient>,
        rate_limits: Arc<dyn RateLimitStore>,
        settings: Settings,
        admin_username: &str,
        admin_password: &str,
    ) -> anyhow::Result<Self> {
        let admin_account_id = match database.get_account(admin_username).await {
            Ok(account) => account.account_id,
            Err(StoreError::NotFound) => {
                let password_hash = bcrypt::hash(admin_password, bcrypt::DEFAULT_COST)
                    .context("cannot hash admin password")?;
                let account = database
                    .upsert_account_tx(&UpsertAccountTx {
                        username: admin_username.to_string(),
                        password_hash,
                        privilege: Privilege::Admin,
                        balance_delta: 0,
                        ttl: Duration::days(365 * 99),
                        // Random digest so bootstrapping cannot collide with a
                        // real deposit.
                        deposit_digest: format!("admin-bootstrap-{}", Uuid::new_v4()),
                        deposit_epoch: 0,
                    })
                    .await
                    .context("failed to create admin account")?;
                account.account_id
            }
            Err(err) => return Err(anyhow!("failed to look up admin account: {}", err)),
        };

        let free_quota_service_id = match database
            .find_service_by_global_id(FREE_QUOTA_SERVICE_GLOBAL_ID)
            .await
        {
            Ok(service) => service.service_id,
            Err(StoreError::NotFound) => {
                let service = database
                    .create_service(
                        FREE_QUOTA_SERVICE_GLOBAL_ID,
                        "free quota",
                        &TokenPolicy::product(1),
                    )
                    .await
                    .context("failed to create free quota service")?;
                service.service_id
            }
            Err(err) => return Err(anyhow!("failed to look up free quota service: {}", err)),
        };

        let exchange = Self {
            database,
            auth,
            minter,
            payment,
            rate_limits,
            cursors: CursorCodec::new(),
            policies: RwLock::new(HashMap::new()),
            settings,
            admin_account_id,
            free_quota_service_id,
        };
        exchange.load_policies().await?;
        Ok(exchange)
    }

    /// Fills the policy cache from the ledger. An unknown policy type in the
    /// database fails the load; a service we cannot price must not go
    /// unnoticed.
    async fn load_policies(&self) -> anyhow::Result<()> {
        let mut start_id = 0;
        let mut loaded = HashMap::new();
        loop {
            let services = self
                .database
                .list_services(start_id, 0, 50)
                .await
                .context("failed to list services")?;
            if services.is_empty() {
                break;
            }
            start_id = services.last().unwrap().service_id + 1;
            for service in services {
                loaded.insert(service.service_id, service.token_policy);
            }
        }
        *self.policies.write().unwrap() = loaded;
        Ok(())
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn quota_key_id(&self) -> &str {
        self.minter.key_id()
    }

    pub fn admin_account_id(&self) -> i64 {
        self.admin_account_id
    }

    pub fn free_quota_service_id(&self) -> i64 {
        self.free_quota_service_id
    }

    /// Whether `account_id` may call admin endpoints.
    pub async fn is_admin(&self, account_id: i64) -> Result<bool> {
        if account_id == self.admin_account_id {
            return Ok(true);
        }
        match self.database.get_account_by_id(account_id).await {
            Ok(account) => Ok(account.privilege == Privilege::Admin),
            Err(StoreError::NotFound) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub fn get_challenge(&self, address: &Address) -> ([u8; 32], DateTime<Utc>) {
        let start_time = self.auth.now();
        (self.auth.challenge(address, start_time), start_time)
    }

    pub fn list_payment_methods(&self) -> Vec<PaymentMethod> {
        vec![PaymentMethod {
            coin: "SUI",
            network: self.settings.network.clone(),
            address: self.payment.address(),
        }]
    }

    /// Verifies a chain deposit and the depositor's signed challenge, then
    /// credits the account. The time-to-live extension is paid for out of the
    /// deposited amount.
    pub async fn deposit(&self, request: &DepositRequest) -> Result<Account> {
        if request.ttl_seconds < 0 || request.ttl_seconds > self.settings.max_expiration_extension {
            return Err(Error::InvalidArgument(format!(
                "ttl seconds not in valid range [0, {}]",
                self.settings.max_expiration_extension
            )));
        }
        let transfer = self
            .payment
            .check_deposit(&request.chain_digest, self.settings.max_deposit_epoch_gap)
            .await
            .map_err(|err| Error::PermissionDenied(format!("digest check failed: {}", err)))?;
        if transfer.amount <= 0 {
            return Err(Error::InvalidArgument(format!(
                "got non positive deposit amount: {}",
                transfer.amount
            )));
        }
        let ttl_fee =
            (request.ttl_seconds as f64 / 1000.0 * self.settings.account_ttl_price).ceil() as i64;
        let balance_delta = transfer.amount - ttl_fee;
        if balance_delta < 0 {
            return Err(Error::InvalidArgument(format!(
                "insufficient deposit {} for a ttl of {} seconds",
                transfer.amount, request.ttl_seconds
            )));
        }
        // The challenge must be signed by the chain account the deposit came
        // from; anything else would let a bystander capture the credit.
        self.auth.verify_payload(
            request.start_time,
            &request.challenge,
            &transfer.sender,
            &request.signature,
        )?;
        let password_hash = bcrypt::hash(&request.password, bcrypt::DEFAULT_COST)
            .context("failed to hash password")?;
        let account = self
            .database
            .upsert_account_tx(&UpsertAccountTx {
                username: request.username.clone(),
                password_hash,
                privilege: Privilege::User,
                balance_delta,
                ttl: Duration::seconds(request.ttl_seconds),
                deposit_digest: request.chain_digest.clone(),
                deposit_epoch: transfer.epoch,
            })
            .await
            .map_err(|err| match err {
                StoreError::Duplicate => {
                    Error::AlreadyExists("deposit digest has already been applied".to_string())
                }
                other => other.into(),
            })?;
        Ok(account)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<(String, Account)> {
        let account = match self.database.get_account(username).await {
            Ok(account) => account,
            Err(StoreError::NotFound) => {
                return Err(Error::Unauthenticated(format!(
                    "cannot find username {:?}",
                    username
                )))
            }
            Err(err) => return Err(err.into()),
        };
        let matches = bcrypt::verify(password, &account.password_hash)
            .context("failed to check password")?;
        if !matches {
            return Err(Error::PermissionDenied(
                "username exists but password incorrect".to_string(),
            ));
        }
        let token = self.auth.generate_session_token(account.account_id)?;
        Ok((token, account))
    }

    pub async fn create_sell_order(
        &self,
        account_id: i64,
        parent: &str,
        ask_price: i64,
        quantity: i64,
        service_expire_time: DateTime<Utc>,
    ) -> Result<ActiveOrder> {
        let service_id = resource::parse_one(parent, "services")?;
        if ask_price < 0 || quantity <= 0 {
            return Err(Error::InvalidArgument(format!(
                "expect non negative price and positive quantity but got {} and {}",
                ask_price, quantity
            )));
        }
        if !self.policies.read().unwrap().contains_key(&service_id) {
            return Err(Error::NotFound(format!("unknown service {}", service_id)));
        }
        let order = self
            .database
            .create_order(&CreateOrder {
                seller_id: account_id,
                service_id,
                ask_price,
                quantity,
                // Orders stop matching exactly when the offered quota stops
                // being usable.
                order_expire_time: service_expire_time,
                service_expire_time,
            })
            .await?;
        Ok(order)
    }

    pub async fn delete_sell_order(&self, account_id: i64, name: &str) -> Result<()> {
        let (owner_id, order_id) = resource::parse_two(name, "accounts", "sell-orders")?;
        if owner_id != account_id {
            return Err(Error::PermissionDenied(format!(
                "account {} does not own {}",
                account_id, name
            )));
        }
        match self.database.cancel_order(order_id, account_id).await {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound) => Err(Error::NotFound(
                "order not found or not under your login account".to_string(),
            )),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn match_order(
        &self,
        account_id: i64,
        parent: &str,
        bid_price: i64,
        bid_quantity: i64,
        min_expire_time: DateTime<Utc>,
    ) -> Result<FulfilledOrder> {
        let service_id = resource::parse_one(parent, "services")?;
        if bid_price < 0 || bid_quantity <= 0 {
            return Err(Error::InvalidArgument(format!(
                "expect non negative bid price and positive quantity but got {} and {}",
                bid_price, bid_quantity
            )));
        }
        match self
            .database
            .match_order_tx(&MatchOrderTx {
                buyer_id: account_id,
                service_id,
                bid_price,
                bid_quantity,
                min_expire_time,
            })
            .await
        {
            Ok(fulfillment) => Ok(fulfillment),
            Err(StoreError::NotFound) => Err(Error::NotFound("no order matched".to_string())),
            Err(StoreError::Constraint(message)) => Err(Error::FailedPrecondition(message)),
            Err(err) => Err(err.into()),
        }
    }

    /// Turns fulfilled order units into a signed capability token. The claim
    /// argument is priced by the service's token policy; claims against the
    /// free quota service additionally pass the per account allowance and get
    /// a token that only lives until the next refresh.
    pub async fn claim_token(
        &self,
        account_id: i64,
        name: &str,
        audience: Address,
        quota_claim: &str,
    ) -> Result<QuotaToken> {
        let (service_id, order_fulfillment_id) =
            resource::parse_two(name, "services", "fulfilled-orders")?;
        let policy = self
            .policies
            .read()
            .unwrap()
            .get(&service_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("unknown service {}", service_id)))?;
        let (quantity, policy_claims) = policy
            .parse_and_verify_quantity(quota_claim)
            .map_err(|err| Error::InvalidArgument(err.to_string()))?;

        let free = service_id == self.free_quota_service_id;
        if free && self.settings.enable_quota_limiter {
            let remaining = self
                .rate_limits
                .decrement(
                    &free_quota_key(account_id),
                    quantity,
                    self.settings.free_quota_grant,
                    self.settings
                        .free_quota_refresh_period
                        .to_std()
                        .unwrap_or_default(),
                )
                .await
                .context("free quota check failed")?;
            if remaining < 0 {
                return Err(Error::ResourceExhausted(format!(
                    "free quota exhausted until the next refresh, over by {}",
                    -remaining
                )));
            }
        }

        let claim = match self
            .database
            .claim_order_tx(&ClaimOrderTx {
                buyer_id: account_id,
                order_fulfillment_id,
                audience_address: audience,
                claim_quantity: quantity,
            })
            .await
        {
            Ok(claim) => claim,
            Err(StoreError::NotFound) => {
                return Err(Error::NotFound(format!(
                    "no fulfillment {} owned by account {}",
                    order_fulfillment_id, account_id
                )))
            }
            Err(StoreError::Constraint(message)) => return Err(Error::FailedPrecondition(message)),
            Err(err) => return Err(err.into()),
        };

        let expiration = if free {
            self.auth.now() + self.settings.free_quota_refresh_period
        } else {
            claim.expiration
        };
        let (token, claims) = self.minter.mint(&claim, expiration, policy_claims)?;
        if !free && self.settings.enable_quota_limiter {
            // Seed the per token counter so activation can decrement it for
            // exactly as long as the token is valid.
            let ttl = (expiration - self.auth.now()).to_std().unwrap_or_default();
            self.rate_limits
                .set_quota(&sold_quota_key(&claims.jti), claims.quota_quantity, ttl)
                .await
                .context("failed to seed sold quota counter")?;
        }
        Ok(QuotaToken { token, claims })
    }

    /// Verifies a quota token and burns one activation from its counter.
    pub async fn activate_quota_token(&self, token: &str) -> Result<QuotaTokenClaims> {
        let claims = self.minter.verify(token)?;
        if self.settings.enable_quota_limiter {
            let ttl = (claims.exp - self.auth.now().timestamp()).max(1);
            let remaining = self
                .rate_limits
                .decrement(
                    &sold_quota_key(&claims.jti),
                    QUOTA_STEP,
                    claims.quota_quantity,
                    std::time::Duration::from_secs(ttl as u64),
                )
                .await
                .context("sold quota check failed")?;
            if remaining < 0 {
                return Err(Error::ResourceExhausted(
                    "quota token has no activations left".to_string(),
                ));
            }
        }
        Ok(claims)
    }

    /// Moves `amount` from the audience account to the buyer and signs a
    /// transfer token over it. The token is signed between the balance moves
    /// and the commit: a commit failure surfaces as Internal and the signed
    /// token is discarded, so a token never leaves the building unless the
    /// debit is durable.
    pub async fn buy_token(
        &self,
        account_id: i64,
        audience_username: &str,
        amount: i64,
    ) -> Result<String> {
        if amount <= 0 {
            return Err(Error::InvalidArgument(format!(
                "expect a positive amount but got {}",
                amount
            )));
        }
        let mut transaction = self.database.begin().await.map_err(Error::from)?;
        database::change_balance(&mut transaction, account_id, amount)
            .await
            .map_err(Error::from)?;
        match database::change_balance_by_username(&mut transaction, audience_username, -amount).await
        {
            Ok(_) => (),
            Err(StoreError::NotFound) => {
                return Err(Error::NotFound(format!(
                    "no account with username {:?}",
                    audience_username
                )))
            }
            Err(StoreError::Constraint(message)) => return Err(Error::FailedPrecondition(message)),
            Err(err) => return Err(err.into()),
        }
        let (token, _) =
            self.minter
                .mint_transfer_token(audience_username, amount, self.settings.token_ttl)?;
        transaction
            .commit()
            .await
            .map_err(|err| Error::Internal(anyhow!("failed to commit transaction: {}", err)))?;
        Ok(token)
    }

    pub async fn create_withdraw(
        &self,
        account_id: i64,
        parent: &str,
        address_to: Address,
        amount: i64,
        priority_fee: i64,
        withdraw_all: bool,
    ) -> Result<Withdrawal> {
        let owner_id = resource::parse_one(parent, "accounts")?;
        if owner_id != account_id {
            return Err(Error::PermissionDenied(format!(
                "account {} cannot withdraw for {}",
                account_id, parent
            )));
        }
        if priority_fee < 0 || (!withdraw_all && amount <= 0) {
            return Err(Error::InvalidArgument(format!(
                "expect positive amount and non negative priority fee but got {} and {}",
                amount, priority_fee
            )));
        }
        match self
            .database
            .withdraw_tx(&WithdrawTx {
                account_id,
                withdraw_address: address_to,
                amount,
                priority_fee,
                withdraw_all,
            })
            .await
        {
            Ok(withdrawal) => Ok(withdrawal),
            Err(StoreError::Duplicate) => Err(Error::FailedPrecondition(
                "a live withdrawal to this address already exists".to_string(),
            )),
            Err(StoreError::Constraint(message)) => Err(Error::FailedPrecondition(message)),
            Err(StoreError::NotFound) => Err(Error::NotFound("account not found".to_string())),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn cancel_withdraw(&self, account_id: i64, name: &str) -> Result<Withdrawal> {
        let (owner_id, withdrawal_id) = resource::parse_two(name, "accounts", "withdraws")?;
        if owner_id != account_id {
            return Err(Error::PermissionDenied(format!(
                "account {} does not own {}",
                account_id, name
            )));
        }
        match self.database.cancel_withdraw_tx(withdrawal_id, account_id).await {
            Ok(withdrawal) => Ok(withdrawal),
            Err(StoreError::NotFound) => Err(Error::NotFound(
                "withdrawal not found or no longer waiting".to_string(),
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// Groups the best waiting withdrawals into one chain transaction. The
    /// dry run digest is persisted together with the batch before the
    /// transaction is submitted, so the database commits first: if the chain
    /// submission then fails the batch stays processing and the persisted
    /// bytes can be replayed idempotently under the same digest.
    pub async fn batch_process_withdraws(&self, limit: i64) -> Result<BatchProcessOutcome> {
        if limit <= 0 || limit > self.settings.withdraw_recipient_count {
            return Err(Error::InvalidArgument(format!(
                "limit exceeds valid range (0, {}]",
                self.settings.withdraw_recipient_count
            )));
        }
        let mut transaction = self.database.begin().await.map_err(Error::from)?;
        let candidates = database::select_candidate_withdrawals(&mut transaction, limit)
            .await
            .map_err(Error::from)?;
        if candidates.is_empty() {
            return Ok(BatchProcessOutcome {
                batch_size: 0,
                digest: None,
            });
        }

        let transfers: Vec<TransferInfo> = candidates
            .iter()
            .map(|withdrawal| TransferInfo {
                address: withdrawal.withdraw_address,
                amount: withdrawal.amount,
            })
            .collect();
        let withdrawal_ids: Vec<i64> = candidates.iter().map(|w| w.withdrawal_id).collect();
        let total_priority_fee: i64 = candidates.iter().map(|w| w.priority_fee).sum();

        let prepared = self
            .payment
            .prepare_withdraw(&transfers, total_priority_fee)
            .await
            .map_err(|err| Error::Internal(anyhow!("failed to prepare withdrawal: {}", err)))?;
        let digest = self
            .payment
            .dry_run(&prepared)
            .await
            .map_err(|err| Error::Internal(anyhow!("failed to calculate transaction digest: {}", err)))?;

        let batch =
            database::set_withdrawal_batch(&mut transaction, &digest, &prepared.tx_bytes, total_priority_fee)
                .await
                .map_err(Error::from)?;
        database::process_withdrawals(&mut transaction, &withdrawal_ids, batch.processing_withdrawal_id)
            .await
            .map_err(Error::from)?;
        transaction
            .commit()
            .await
            .map_err(|err| Error::Internal(anyhow!("failed to commit withdrawal batch: {}", err)))?;

        // From here on the ledger is committed. A submission failure leaves
        // the batch processing; reconciliation or a manual replay of the
        // persisted bytes picks it up.
        let submitted_digest = self
            .payment
            .submit(&prepared)
            .await
            .map_err(|err| Error::Internal(anyhow!("failed to submit withdrawal batch: {}", err)))?;
        Ok(BatchProcessOutcome {
            batch_size: withdrawal_ids.len() as i64,
            digest: Some(submitted_digest),
        })
    }

    /// Reconciles processing batches against the chain, one task per batch.
    /// Partial failures are logged and retried on the next run rather than in
    /// band.
    pub async fn batch_mark_withdraws(&self, limit: i64) -> Result<Vec<i64>> {
        if limit <= 0 || limit > self.settings.withdraw_check_status_count {
            return Err(Error::InvalidArgument(format!(
                "limit exceeds valid range (0, {}]",
                self.settings.withdraw_check_status_count
            )));
        }
        let batches = self.database.list_processing_withdrawals(limit).await?;
        let (sender, mut receiver) = tokio::sync::mpsc::channel(batches.len().max(1));
        let mut tasks = Vec::with_capacity(batches.len());
        for batch in batches {
            let payment = self.payment.clone();
            let database = self.database.clone();
            let sender = sender.clone();
            tasks.push(tokio::spawn(async move {
                let digest = batch.transaction_digest;
                match payment.check_transaction_status(&digest).await {
                    Ok(TransactionStatus::Success) => {
                        match database.set_withdrawal_success(&digest).await {
                            Ok(updated) => {
                                let _ = sender.send(updated.processing_withdrawal_id).await;
                            }
                            Err(err) => {
                                tracing::error!(%digest, ?err, "failed to mark withdrawal batch successful")
                            }
                        }
                    }
                    Ok(TransactionStatus::Pending) => {
                        tracing::info!(%digest, "withdrawal batch is pending")
                    }
                    Ok(status) => {
                        tracing::error!(%digest, ?status, "got undefined status for withdrawal batch")
                    }
                    Err(err) => {
                        tracing::error!(%digest, ?err, "check transaction status failed")
                    }
                }
            }));
        }
        drop(sender);
        futures::future::join_all(tasks).await;

        let mut success_ids = Vec::new();
        while let Some(id) = receiver.recv().await {
            success_ids.push(id);
        }
        Ok(success_ids)
    }

    pub async fn create_service(
        &self,
        global_id: Uuid,
        display_name: &str,
        token_policy: TokenPolicy,
    ) -> Result<Service> {
        let service = self
            .database
            .create_service(global_id, display_name, &token_policy)
            .await
            .map_err(|err| match err {
                StoreError::Duplicate => {
                    Error::AlreadyExists("a service with this global id already exists".to_string())
                }
                other => other.into(),
            })?;
        self.policies
            .write()
            .unwrap()
            .insert(service.service_id, token_policy);
        Ok(service)
    }

    pub async fn delete_service(&self, name: &str) -> Result<()> {
        let service_id = resource::parse_one(name, "services")?;
        match self.database.remove_service(service_id).await {
            Ok(_) => {
                self.policies.write().unwrap().remove(&service_id);
                Ok(())
            }
            Err(StoreError::NotFound) => Err(Error::NotFound("service not found".to_string())),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn list_services(
        &self,
        page_size: Option<i64>,
        skip: Option<i64>,
        page_token: Option<&str>,
    ) -> Result<(Vec<Service>, Option<String>)> {
        let now = self.auth.now();
        let pagination = parse_pagination(&self.cursors, page_size, skip, page_token, now)?;
        let services = self
            .database
            .list_services(pagination.start_id, pagination.skip, pagination.page_size)
            .await?;
        let next_page_token = if services.len() as i64 == pagination.page_size {
            Some(self.cursors.encode(services.last().unwrap().service_id + 1, now))
        } else {
            None
        };
        Ok((services, next_page_token))
    }

    pub async fn list_fulfilled_orders(
        &self,
        account_id: i64,
        parent: Option<&str>,
        min_remaining_quantity: i64,
        page_size: Option<i64>,
        skip: Option<i64>,
        page_token: Option<&str>,
    ) -> Result<(Vec<FulfilledOrder>, Option<String>)> {
        let service_id = match parent {
            Some(parent) if !parent.is_empty() => Some(resource::parse_one(parent, "services")?),
            _ => None,
        };
        let now = self.auth.now();
        let pagination = parse_pagination(&self.cursors, page_size, skip, page_token, now)?;
        let orders = self
            .database
            .list_fulfilled_orders(&ListFulfilledOrders {
                buyer_id: account_id,
                service_id,
                min_remaining_quantity,
                start_id: pagination.start_id,
                skip: pagination.skip,
                limit: pagination.page_size,
            })
            .await?;
        let next_page_token = if orders.len() as i64 == pagination.page_size {
            Some(
                self.cursors
                    .encode(orders.last().unwrap().order_fulfillment_id + 1, now),
            )
        } else {
            None
        };
        Ok((orders, next_page_token))
    }

    pub async fn prune_accounts(&self) -> Result<Vec<i64>> {
        Ok(self.database.delete_invalid_accounts().await?)
    }

    pub async fn batch_prune_fulfilled_orders(&self) -> Result<(usize, usize)> {
        let sell_orders = self.database.clean_inactive_orders().await?;
        let fulfilled_orders = self.database.clean_expired_fulfilled_orders().await?;
        Ok((sell_orders.len(), fulfilled_orders.len()))
    }

    pub async fn clean_old_withdrawals(&self, before: DateTime<Utc>) -> Result<Vec<i64>> {
        let batches = self.database.clean_old_withdrawals(before).await?;
        Ok(batches
            .into_iter()
            .map(|batch| batch.processing_withdrawal_id)
            .collect())
    }

    pub fn service_registration_requires_admin(&self) -> bool {
        self.settings.enable_service_registration_whitelist
    }
}
