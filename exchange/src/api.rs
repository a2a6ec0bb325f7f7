mod buy_token;
mod challenge;
mod claim_token;
mod deposit;
mod fulfilled_orders;
mod login;
mod match_order;
mod prune;
mod quota;
mod sell_orders;
mod services;
mod withdrawals;

use crate::{error::Error, exchange::Exchange};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use warp::{
    hyper::StatusCode,
    reply::{json, with_status, Json, WithStatus},
    Filter, Rejection, Reply,
};

pub fn handle_all_routes(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let routes = challenge::get_challenge(exchange.clone())
        .or(deposit::deposit(exchange.clone()))
        .or(login::login(exchange.clone()))
        .or(sell_orders::create_sell_order(exchange.clone()))
        .or(sell_orders::delete_sell_order(exchange.clone()))
        .or(match_order::match_order(exchange.clone()))
        .or(claim_token::claim_token(exchange.clone()))
        .or(buy_token::buy_token(exchange.clone()))
        .or(withdrawals::create_withdraw(exchange.clone()))
        .or(withdrawals::cancel_withdraw(exchange.clone()))
        .or(withdrawals::batch_process_withdraws(exchange.clone()))
        .or(withdrawals::batch_mark_withdraws(exchange.clone()))
        .or(services::list_services(exchange.clone()))
        .or(services::create_service(exchange.clone()))
        .or(services::delete_service(exchange.clone()))
        .or(fulfilled_orders::list_fulfilled_orders(exchange.clone()))
        .or(prune::prune_accounts(exchange.clone()))
        .or(prune::batch_prune_fulfilled_orders(exchange.clone()))
        .or(quota::activate_quota_token(exchange.clone()))
        .or(ping())
        .or(payment_methods(exchange));
    warp::path!("api" / "v1" / ..).and(routes).recover(handle_rejection)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorReply<'a> {
    error_type: &'a str,
    description: &'a str,
}

fn error(error_type: &str, description: impl AsRef<str>) -> Json {
    json(&ErrorReply {
        error_type,
        description: description.as_ref(),
    })
}

fn internal_error() -> Json {
    json(&ErrorReply {
        error_type: "InternalServerError",
        description: "",
    })
}

/// The one place the error taxonomy turns into wire status codes.
fn error_reply(err: &Error) -> WithStatus<Json> {
    match err {
        Error::InvalidArgument(description) => {
            with_status(error("InvalidArgument", description), StatusCode::BAD_REQUEST)
        }
        Error::Unauthenticated(description) => {
            with_status(error("Unauthenticated", description), StatusCode::UNAUTHORIZED)
        }
        Error::PermissionDenied(description) => {
            with_status(error("PermissionDenied", description), StatusCode::FORBIDDEN)
        }
        Error::NotFound(description) => {
            with_status(error("NotFound", description), StatusCode::NOT_FOUND)
        }
        Error::AlreadyExists(description) => {
            with_status(error("AlreadyExists", description), StatusCode::CONFLICT)
        }
        Error::FailedPrecondition(description) => with_status(
            error("FailedPrecondition", description),
            StatusCode::PRECONDITION_FAILED,
        ),
        Error::ResourceExhausted(description) => with_status(
            error("ResourceExhausted", description),
            StatusCode::TOO_MANY_REQUESTS,
        ),
        Error::Internal(err) => {
            tracing::error!(?err, "internal error");
            with_status(internal_error(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub(crate) trait IntoWarpReply {
    fn into_warp_reply(self) -> WithStatus<Json>;
}

impl IntoWarpReply for Error {
    fn into_warp_reply(self) -> WithStatus<Json> {
        error_reply(&self)
    }
}

/// Serializes a handler result, successes with `ok_status`.
pub(crate) fn reply<T: Serialize>(result: Result<T, Error>, ok_status: StatusCode) -> WithStatus<Json> {
    match result {
        Ok(body) => with_status(json(&body), ok_status),
        Err(err) => err.into_warp_reply(),
    }
}

const MAX_JSON_BODY_PAYLOAD: u64 = 1024 * 16;

pub(crate) fn extract_payload<T: DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    // (rejecting huge payloads)...
    warp::body::content_length_limit(MAX_JSON_BODY_PAYLOAD).and(warp::body::json())
}

#[derive(Debug)]
struct ApiReject(Error);
impl warp::reject::Reject for ApiReject {}

fn authorize(exchange: &Exchange, header: Option<&str>) -> Result<i64, Error> {
    let header = header
        .ok_or_else(|| Error::Unauthenticated("missing authorization header".to_string()))?;
    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| Error::Unauthenticated("bad authorization string".to_string()))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(Error::Unauthenticated(
            "request unauthenticated with bearer".to_string(),
        ));
    }
    exchange.auth().verify_session_token(token.trim())
}

/// Extracts the calling account from the bearer session token.
pub(crate) fn authenticated(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (i64,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let exchange = exchange.clone();
        async move {
            authorize(&exchange, header.as_deref())
                .map_err(|err| warp::reject::custom(ApiReject(err)))
        }
    })
}

/// Like `authenticated` but additionally requires admin privilege.
pub(crate) fn admin_only(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (i64,), Error = Rejection> + Clone {
    authenticated(exchange.clone()).and_then(move |account_id: i64| {
        let exchange = exchange.clone();
        async move {
            match exchange.is_admin(account_id).await {
                Ok(true) => Ok(account_id),
                Ok(false) => Err(warp::reject::custom(ApiReject(Error::PermissionDenied(
                    "admin privilege required".to_string(),
                )))),
                Err(err) => Err(warp::reject::custom(ApiReject(err))),
            }
        }
    })
}

async fn handle_rejection(rejection: Rejection) -> Result<WithStatus<Json>, Rejection> {
    match rejection.find::<ApiReject>() {
        Some(ApiReject(err)) => Ok(error_reply(err)),
        None => Err(rejection),
    }
}

fn ping() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("ping").and(warp::get()).map(|| {
        json(&serde_json::json!({ "pong": "pong" }))
    })
}

fn payment_methods(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("payment-methods").and(warp::get()).map(move || {
        json(&serde_json::json!({
            "paymentMethods": exchange.list_payment_methods(),
        }))
    })
}

/// Pagination query parameters shared by the list endpoints.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct PageQuery {
    pub page_size: Option<i64>,
    pub skip: Option<i64>,
    pub page_token: Option<String>,
}

#[cfg(test)]
async fn response_body(response: warp::hyper::Response<warp::hyper::Body>) -> Vec<u8> {
    let mut body = response.into_body();
    let mut result = Vec::new();
    while let Some(bytes) = futures::StreamExt::next(&mut body).await {
        result.extend_from_slice(bytes.unwrap().as_ref());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn status_mapping_covers_the_taxonomy() {
        let cases = [
            (Error::InvalidArgument("a".into()), StatusCode::BAD_REQUEST),
            (Error::Unauthenticated("a".into()), StatusCode::UNAUTHORIZED),
            (Error::PermissionDenied("a".into()), StatusCode::FORBIDDEN),
            (Error::NotFound("a".into()), StatusCode::NOT_FOUND),
            (Error::AlreadyExists("a".into()), StatusCode::CONFLICT),
            (Error::FailedPrecondition("a".into()), StatusCode::PRECONDITION_FAILED),
            (Error::ResourceExhausted("a".into()), StatusCode::TOO_MANY_REQUESTS),
            (Error::Internal(anyhow!("boom")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let response = err.into_warp_reply().into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[tokio::test]
    async fn internal_errors_are_not_leaked() {
        let response = Error::Internal(anyhow!("connection string with secrets"))
            .into_warp_reply()
            .into_response();
        let body = response_body(response).await;
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"errorType": "InternalServerError", "description": ""})
        );
    }
}
