use crate::{
    api::{authenticated, extract_payload, reply},
    exchange::Exchange,
};
use model::Address;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{hyper::StatusCode, Filter, Rejection, Reply};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ClaimTokenPayload {
    /// `services/{id}/fulfilled-orders/{id}` to claim against. Claims naming
    /// the free quota service take the free route.
    pub name: String,
    /// Address the minted token is made out to.
    pub audience: Address,
    /// Service specific claim argument priced by the token policy.
    #[serde(default)]
    pub quota_claim: serde_json::Map<String, serde_json::Value>,
}

fn request() -> impl Filter<Extract = (ClaimTokenPayload,), Error = Rejection> + Clone {
    warp::path!("claim-tokens").and(warp::post()).and(extract_payload())
}

pub fn claim_token(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    request().and(authenticated(exchange.clone())).and_then(
        move |payload: ClaimTokenPayload, account_id: i64| {
            let exchange = exchange.clone();
            async move {
                let quota_claim = serde_json::Value::Object(payload.quota_claim).to_string();
                let result = exchange
                    .claim_token(account_id, &payload.name, payload.audience, &quota_claim)
                    .await;
                Result::<_, Infallible>::Ok(reply(result, StatusCode::CREATED))
            }
        },
    )
}
