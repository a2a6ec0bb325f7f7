use crate::{
    api::{authenticated, extract_payload, reply},
    exchange::Exchange,
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{hyper::StatusCode, Filter, Rejection, Reply};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BuyTokenPayload {
    /// Username of the account the token opens a session with.
    pub audience: String,
    pub amount: i64,
}

#[derive(Serialize)]
struct BuyTokenReply {
    token: String,
}

fn request() -> impl Filter<Extract = (BuyTokenPayload,), Error = Rejection> + Clone {
    warp::path!("buy-tokens").and(warp::post()).and(extract_payload())
}

pub fn buy_token(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    request().and(authenticated(exchange.clone())).and_then(
        move |payload: BuyTokenPayload, account_id: i64| {
            let exchange = exchange.clone();
            async move {
                let result = exchange
                    .buy_token(account_id, &payload.audience, payload.amount)
                    .await
                    .map(|token| BuyTokenReply { token });
                Result::<_, Infallible>::Ok(reply(result, StatusCode::CREATED))
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::test::request as test_request;

    #[tokio::test]
    async fn buy_token_request_parses() {
        let filter = request();
        let payload = BuyTokenPayload {
            audience: "service-provider".to_string(),
            amount: 250,
        };
        let parsed = test_request()
            .path("/buy-tokens")
            .method("POST")
            .header("content-type", "application/json")
            .json(&payload)
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(parsed, payload);
    }
}
