use crate::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a withdrawal request. Transitions are:
/// waiting -> cancelled (deleted, by the owner), waiting -> processing (batch
/// processing), processing -> success (status reconciliation), success ->
/// deleted (garbage collection). Nothing else.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Waiting,
    Processing,
    Success,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Processing => "processing",
            Self::Success => "success",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "processing" => Some(Self::Processing),
            "success" => Some(Self::Success),
            _ => None,
        }
    }
}

/// A request to move balance back to the chain. At most one non terminal
/// withdrawal may exist per `(account_id, withdraw_address)` pair.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub withdrawal_id: i64,
    pub account_id: i64,
    pub withdraw_address: Address,
    pub amount: i64,
    pub priority_fee: i64,
    pub processing_withdrawal_id: Option<i64>,
    pub status: WithdrawalStatus,
}

/// Status of a batched chain transaction covering several withdrawals.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Processing,
    Success,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Success => "success",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "success" => Some(Self::Success),
            _ => None,
        }
    }
}

/// One multi recipient chain transaction grouping pending withdrawals. The
/// digest is obtained from a dry run before submission and doubles as the
/// idempotency key for replays.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProcessingWithdrawal {
    pub processing_withdrawal_id: i64,
    pub transaction_digest: String,
    pub transaction_bytes: String,
    pub total_priority_fee: i64,
    pub status: ProcessingStatus,
    pub created_time: DateTime<Utc>,
}
