use crate::{
    api::{admin_only, authenticated, extract_payload, reply},
    exchange::Exchange,
};
use model::{resource, withdrawal::Withdrawal, Address};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{hyper::StatusCode, Filter, Rejection, Reply};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CreateWithdrawPayload {
    /// `accounts/{id}` the withdrawal debits.
    pub parent: String,
    pub address_to: Address,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub priority_fee: i64,
    #[serde(default)]
    pub withdraw_all: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CancelWithdrawPayload {
    /// `accounts/{id}/withdraws/{id}`.
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BatchLimitPayload {
    pub limit: i64,
}

#[derive(Serialize)]
struct WithdrawalReply {
    name: String,
    #[serde(flatten)]
    withdrawal: Withdrawal,
}

impl From<Withdrawal> for WithdrawalReply {
    fn from(withdrawal: Withdrawal) -> Self {
        Self {
            name: resource::format_withdrawal(withdrawal.account_id, withdrawal.withdrawal_id),
            withdrawal,
        }
    }
}

#[derive(Serialize)]
struct BatchMarkReply {
    success_withdraw_ids: Vec<i64>,
}

fn create_request() -> impl Filter<Extract = (CreateWithdrawPayload,), Error = Rejection> + Clone {
    warp::path!("withdraws").and(warp::post()).and(extract_payload())
}

fn cancel_request() -> impl Filter<Extract = (CancelWithdrawPayload,), Error = Rejection> + Clone {
    warp::path!("withdraws").and(warp::delete()).and(extract_payload())
}

fn batch_process_request() -> impl Filter<Extract = (BatchLimitPayload,), Error = Rejection> + Clone {
    warp::path!("withdraws" / "batch-process")
        .and(warp::post())
        .and(extract_payload())
}

fn batch_mark_request() -> impl Filter<Extract = (BatchLimitPayload,), Error = Rejection> + Clone {
    warp::path!("withdraws" / "batch-mark")
        .and(warp::post())
        .and(extract_payload())
}

pub fn create_withdraw(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    create_request().and(authenticated(exchange.clone())).and_then(
        move |payload: CreateWithdrawPayload, account_id: i64| {
            let exchange = exchange.clone();
            async move {
                let result = exchange
                    .create_withdraw(
                        account_id,
                        &payload.parent,
                        payload.address_to,
                        payload.amount,
                        payload.priority_fee,
                        payload.withdraw_all,
                    )
                    .await;
                Result::<_, Infallible>::Ok(reply(
                    result.map(WithdrawalReply::from),
                    StatusCode::CREATED,
                ))
            }
        },
    )
}

pub fn cancel_withdraw(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    cancel_request().and(authenticated(exchange.clone())).and_then(
        move |payload: CancelWithdrawPayload, account_id: i64| {
            let exchange = exchange.clone();
            async move {
                let result = exchange.cancel_withdraw(account_id, &payload.name).await;
                Result::<_, Infallible>::Ok(reply(
                    result.map(WithdrawalReply::from),
                    StatusCode::OK,
                ))
            }
        },
    )
}

pub fn batch_process_withdraws(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    batch_process_request().and(admin_only(exchange.clone())).and_then(
        move |payload: BatchLimitPayload, _admin_id: i64| {
            let exchange = exchange.clone();
            async move {
                let result = exchange.batch_process_withdraws(payload.limit).await;
                Result::<_, Infallible>::Ok(reply(result, StatusCode::OK))
            }
        },
    )
}

pub fn batch_mark_withdraws(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    batch_mark_request().and(admin_only(exchange.clone())).and_then(
        move |payload: BatchLimitPayload, _admin_id: i64| {
            let exchange = exchange.clone();
            async move {
                let result = exchange
                    .batch_mark_withdraws(payload.limit)
                    .await
                    .map(|success_withdraw_ids| BatchMarkReply {
                        success_withdraw_ids,
                    });
                Result::<_, Infallible>::Ok(reply(result, StatusCode::OK))
            }
        },
    )
}
