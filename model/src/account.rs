use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an account is allowed to do. Admin accounts may run the batch
/// withdrawal pipeline, the garbage collection endpoints and manage services.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    User,
    Admin,
}

impl Privilege {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// An account on the exchange. `balance` never goes below zero; the storage
/// layer enforces this with a constraint. Accounts past `expire_time` are
/// eligible for pruning.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: i64,
    pub username: String,
    #[serde(skip)]
    pub password_hash: String,
    pub privilege: Privilege,
    pub balance: i64,
    pub expire_time: DateTime<Utc>,
}
