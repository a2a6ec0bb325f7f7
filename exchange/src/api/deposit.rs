use crate::{
    api::{extract_payload, reply, IntoWarpReply},
    error::Error,
    exchange::{DepositRequest, Exchange},
};
use chrono::{DateTime, Utc};
use model::{account::Account, resource};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{hyper::StatusCode, Filter, Rejection, Reply};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DepositProof {
    pub chain_digest: String,
    pub signature: String,
    pub start_time: DateTime<Utc>,
    /// Base64 of the challenge bytes handed out by the challenge endpoint.
    pub challenge: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DepositPayload {
    pub proof: DepositProof,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub ttl_seconds: i64,
}

#[derive(Serialize)]
pub(super) struct AccountReply {
    pub name: String,
    #[serde(flatten)]
    pub account: Account,
}

impl From<Account> for AccountReply {
    fn from(account: Account) -> Self {
        Self {
            name: resource::format_account(account.account_id),
            account,
        }
    }
}

fn request() -> impl Filter<Extract = (DepositPayload,), Error = Rejection> + Clone {
    warp::path!("deposit").and(warp::post()).and(extract_payload())
}

pub fn deposit(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    request().and_then(move |payload: DepositPayload| {
        let exchange = exchange.clone();
        async move {
            let challenge = match base64::decode(&payload.proof.challenge) {
                Ok(challenge) => challenge,
                Err(_) => {
                    return Result::<_, Infallible>::Ok(
                        Error::InvalidArgument("challenge is not valid base64".to_string())
                            .into_warp_reply(),
                    )
                }
            };
            let result = exchange
                .deposit(&DepositRequest {
                    chain_digest: payload.proof.chain_digest,
                    signature: payload.proof.signature,
                    start_time: payload.proof.start_time,
                    challenge,
                    username: payload.username,
                    password: payload.password,
                    ttl_seconds: payload.ttl_seconds,
                })
                .await;
            Ok(reply(result.map(AccountReply::from), StatusCode::CREATED))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::test::request as test_request;

    #[tokio::test]
    async fn deposit_request_parses() {
        let filter = request();
        let payload = DepositPayload {
            proof: DepositProof {
                chain_digest: "DdzbG47u5MDUrSVArmVYmvnpDvspgKeAXxzgq2cNnhpJ".to_string(),
                signature: "AAAA".to_string(),
                start_time: Utc::now(),
                challenge: base64::encode([7u8; 32]),
            },
            username: "alice".to_string(),
            password: "secret".to_string(),
            ttl_seconds: 1000,
        };
        let parsed = test_request()
            .path("/deposit")
            .method("POST")
            .header("content-type", "application/json")
            .json(&payload)
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn account_reply_carries_the_resource_name() {
        let account = Account {
            account_id: 7,
            username: "alice".to_string(),
            password_hash: "hash".to_string(),
            privilege: model::account::Privilege::User,
            balance: 10,
            expire_time: Utc::now(),
        };
        let value = serde_json::to_value(AccountReply::from(account)).unwrap();
        assert_eq!(value["name"], "accounts/7");
        assert_eq!(value["balance"], 10);
        assert!(value.get("password_hash").is_none());
    }
}
