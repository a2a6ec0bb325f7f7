use crate::{
    api::{extract_payload, reply},
    exchange::Exchange,
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{hyper::StatusCode, Filter, Rejection, Reply};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ActivateQuotaTokenPayload {
    pub token: String,
}

fn request() -> impl Filter<Extract = (ActivateQuotaTokenPayload,), Error = Rejection> + Clone {
    warp::path!("quota-tokens" / "activate")
        .and(warp::post())
        .and(extract_payload())
}

/// Redeems one activation of a quota token. Authentication is the token
/// itself; the bearer session is not required.
pub fn activate_quota_token(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    request().and_then(move |payload: ActivateQuotaTokenPayload| {
        let exchange = exchange.clone();
        async move {
            let result = exchange.activate_quota_token(&payload.token).await;
            Result::<_, Infallible>::Ok(reply(result, StatusCode::OK))
        }
    })
}
