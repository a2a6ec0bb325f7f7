use crate::token_policy::TokenPolicy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named off platform API whose quota is traded through the exchange.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub service_id: i64,
    pub global_id: Uuid,
    pub display_name: String,
    pub token_policy: TokenPolicy,
}
