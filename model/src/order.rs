use crate::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A sell order sitting in the book. Orders with `quantity = 0` or past
/// `order_expire_time` are inactive and eventually cleaned.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ActiveOrder {
    pub order_id: i64,
    pub seller_id: i64,
    pub service_id: i64,
    pub ask_price: i64,
    pub quantity: i64,
    pub order_expire_time: DateTime<Utc>,
    pub service_expire_time: DateTime<Utc>,
}

/// The result of matching a sell order: a right of the buyer to claim up to
/// `remaining_quantity` quota units until `service_expire_time`.
/// `remaining_quantity` starts at `deal_quantity` and only ever decreases.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FulfilledOrder {
    pub order_fulfillment_id: i64,
    pub order_id: i64,
    pub service_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub deal_price: i64,
    pub deal_quantity: i64,
    pub remaining_quantity: i64,
    pub deal_time: DateTime<Utc>,
    pub service_expire_time: DateTime<Utc>,
}

/// One conversion of fulfilled order units into a signed quota token.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClaimedOrder {
    pub order_claim_id: i64,
    pub order_fulfillment_id: i64,
    pub audience_address: Address,
    pub claim_quantity: i64,
}

/// Everything the token minter needs to know about a successful claim.
/// `expiration` carries the fulfillment's `service_expire_time`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Claim {
    pub order_claim_id: i64,
    pub audience_address: Address,
    pub expiration: DateTime<Utc>,
    pub order_id: i64,
    pub order_fulfillment_id: i64,
    pub seller_id: i64,
    pub service_id: i64,
    pub quantity: i64,
}
