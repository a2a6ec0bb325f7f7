mod accounts;
mod fulfillments;
mod orders;
mod services;
mod withdrawals;

use anyhow::Result;
use sqlx::PgPool;
use thiserror::Error;

pub use accounts::UpsertAccountTx;
pub(crate) use accounts::{change_balance, change_balance_by_username};
pub use fulfillments::{ClaimOrderTx, ListFulfilledOrders};
pub use orders::{CreateOrder, MatchOrderTx};
pub use withdrawals::{
    process_withdrawals, select_candidate_withdrawals, set_withdrawal_batch, WithdrawTx,
};

pub type PgTransaction = sqlx::Transaction<'static, sqlx::Postgres>;

// The pool uses an Arc internally.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Typed storage errors. Constraint and uniqueness failures are classified
/// here so the service layer can translate them without string matching.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,
    #[error("duplicate record")]
    Duplicate,
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("invalid row: {0}")]
    Decode(String),
    #[error(transparent)]
    Other(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => Self::Duplicate,
                // check_violation
                Some("23514") => Self::Constraint(db_err.message().to_string()),
                _ => Self::Other(err),
            },
            _ => Self::Other(err),
        }
    }
}

// The implementation is split up into several modules which contain more public methods.

impl Database {
    pub fn new(uri: &str) -> Result<Self> {
        Ok(Self {
            pool: PgPool::connect_lazy(uri)?,
        })
    }

    /// Starts a transaction for callers that need to interleave ledger writes
    /// with other work before committing, like signing a token that must be
    /// discarded when the commit fails.
    pub async fn begin(&self) -> Result<PgTransaction, StoreError> {
        Ok(self.pool.begin().await?)
    }

    /// Delete all data in the database. Only used by tests.
    pub async fn clear(&self) -> Result<()> {
        use sqlx::Executor;
        for table in [
            "claimed_orders",
            "fulfilled_orders",
            "active_orders",
            "withdrawals",
            "processing_withdrawals",
            "deposits",
            "services",
            "accounts",
        ] {
            self.pool
                .execute(sqlx::query(&format!("DELETE FROM {};", table)))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod testutil {
    use super::*;
    use chrono::Duration;
    use model::{account::Account, account::Privilege, service::Service, token_policy::TokenPolicy};
    use uuid::Uuid;

    pub async fn new_account(db: &Database, username: &str, balance: i64) -> Account {
        db.upsert_account_tx(&UpsertAccountTx {
            username: username.to_string(),
            password_hash: "unused-hash".to_string(),
            privilege: Privilege::User,
            balance_delta: balance,
            ttl: Duration::days(10),
            deposit_digest: format!("digest-of-{}", username),
            deposit_epoch: 1,
        })
        .await
        .unwrap()
    }

    pub async fn new_service(db: &Database, display_name: &str) -> Service {
        db.create_service(Uuid::new_v4(), display_name, &TokenPolicy::product(1))
            .await
            .unwrap()
    }
}
