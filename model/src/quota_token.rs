use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Claims carried by a signed quota capability token. Timestamps are unix
/// seconds as usual for JWS payloads. `policy_claims` echoes the dimensions
/// the token policy priced when the claim argument was parsed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct QuotaTokenClaims {
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    pub jti: String,
    pub service_id: i64,
    pub order_id: i64,
    pub order_fulfillment_id: i64,
    pub seller_id: i64,
    pub quota_quantity: i64,
    #[serde(flatten)]
    pub policy_claims: BTreeMap<String, i64>,
}

/// Claims of a token bought with balance instead of a fulfillment claim, used
/// to open a session with the named audience account.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransferTokenClaims {
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    pub jti: String,
    pub quantity: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn policy_claims_are_flattened() {
        let claims = QuotaTokenClaims {
            iss: "0xissuer".to_string(),
            aud: "0xaudience".to_string(),
            exp: 20,
            nbf: 10,
            iat: 10,
            jti: "a-unique-id".to_string(),
            service_id: 1,
            order_id: 2,
            order_fulfillment_id: 3,
            seller_id: 4,
            quota_quantity: 100,
            policy_claims: btreemap! {"bytes".to_string() => 25},
        };
        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["bytes"], 25);
        assert_eq!(serde_json::from_value::<QuotaTokenClaims>(value).unwrap(), claims);
    }
}
