use crate::exchange::Exchange;
use chrono::{DateTime, Utc};
use model::Address;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{hyper::StatusCode, Filter, Rejection, Reply};

#[derive(Debug, Deserialize)]
pub struct ChallengeQuery {
    pub address: Address,
}

#[derive(Debug, Serialize)]
struct ChallengeReply {
    /// Base64 of the 32 challenge bytes the wallet has to sign.
    challenge: String,
    start_time: DateTime<Utc>,
}

fn request() -> impl Filter<Extract = (ChallengeQuery,), Error = Rejection> + Clone {
    warp::path!("challenge").and(warp::get()).and(warp::query())
}

pub fn get_challenge(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    request().and_then(move |query: ChallengeQuery| {
        let exchange = exchange.clone();
        async move {
            let (challenge, start_time) = exchange.get_challenge(&query.address);
            Result::<_, Infallible>::Ok(warp::reply::with_status(
                warp::reply::json(&ChallengeReply {
                    challenge: base64::encode(challenge),
                    start_time,
                }),
                StatusCode::OK,
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::test::request as test_request;

    #[tokio::test]
    async fn challenge_request_parses_the_address() {
        let filter = request();
        let address = format!("0x{}", "11".repeat(32));
        let query = test_request()
            .path(&format!("/challenge?address={}", address))
            .method("GET")
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(query.address.to_string(), address);
    }

    #[tokio::test]
    async fn challenge_request_rejects_bad_addresses() {
        let filter = request();
        assert!(test_request()
            .path("/challenge?address=0x1234")
            .method("GET")
            .filter(&filter)
            .await
            .is_err());
    }
}
