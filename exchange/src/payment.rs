//! The contract the exchange requires from the payment chain: verifying
//! deposits, preparing and submitting batched withdrawal transactions and
//! polling their status. The chain specific client lives in a submodule; the
//! service only ever talks to the trait so tests can substitute a mock.

pub mod sui;

use anyhow::Result;
use model::Address;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("no transaction found for digest")]
    NotFound,
    #[error("deposit too late")]
    DepositTooLate,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A verified transfer into the platform address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DepositTransfer {
    pub sender: Address,
    pub amount: i64,
    pub epoch: i64,
}

/// One recipient of a withdrawal batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferInfo {
    pub address: Address,
    pub amount: i64,
}

/// Opaque transaction metadata produced by the chain when preparing a
/// withdrawal. The bytes are persisted so an interrupted batch can be
/// replayed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PreparedTransaction {
    pub tx_bytes: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransactionStatus {
    Unknown,
    Success,
    Fail,
    Pending,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PaymentClient: Send + Sync {
    /// The platform address deposits must credit and withdrawals are paid
    /// from.
    fn address(&self) -> Address;

    /// Looks up a deposit transaction by digest and returns its sender, the
    /// amount credited to the platform address and the epoch it landed in.
    /// Deposits older than `max_gap_epochs` are rejected.
    async fn check_deposit(
        &self,
        digest: &str,
        max_gap_epochs: i64,
    ) -> Result<DepositTransfer, PaymentError>;

    /// Builds an unsigned multi recipient transaction paying out `transfers`.
    async fn prepare_withdraw(
        &self,
        transfers: &[TransferInfo],
        total_priority_fee: i64,
    ) -> Result<PreparedTransaction, PaymentError>;

    /// Computes the transaction digest without executing. Deterministic for
    /// the same prepared bytes, which makes the digest usable as an
    /// idempotency key before anything is submitted.
    async fn dry_run(&self, transaction: &PreparedTransaction) -> Result<String, PaymentError>;

    /// Signs and submits a prepared transaction, returning its digest. The
    /// digest is asserted to match the dry run.
    async fn submit(&self, transaction: &PreparedTransaction) -> Result<String, PaymentError>;

    /// Polls a submitted transaction. A transaction the chain does not know
    /// yet reports Pending, not an error.
    async fn check_transaction_status(
        &self,
        digest: &str,
    ) -> Result<TransactionStatus, PaymentError>;
}
