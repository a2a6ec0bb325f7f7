use crate::{
    api::{extract_payload, reply},
    exchange::Exchange,
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{hyper::StatusCode, Filter, Rejection, Reply};

use super::deposit::AccountReply;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
struct LoginReply {
    access_token: String,
    account: AccountReply,
}

fn request() -> impl Filter<Extract = (LoginPayload,), Error = Rejection> + Clone {
    warp::path!("login").and(warp::post()).and(extract_payload())
}

pub fn login(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    request().and_then(move |payload: LoginPayload| {
        let exchange = exchange.clone();
        async move {
            let result = exchange
                .login(&payload.username, &payload.password)
                .await
                .map(|(access_token, account)| LoginReply {
                    access_token,
                    account: AccountReply::from(account),
                });
            Result::<_, Infallible>::Ok(reply(result, StatusCode::OK))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::test::request as test_request;

    #[tokio::test]
    async fn login_request_parses() {
        let filter = request();
        let payload = LoginPayload {
            username: "alice".to_string(),
            password: "secret".to_string(),
        };
        let parsed = test_request()
            .path("/login")
            .method("POST")
            .header("content-type", "application/json")
            .json(&payload)
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(parsed, payload);
    }
}
