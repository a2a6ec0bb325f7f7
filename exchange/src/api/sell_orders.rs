use crate::{
    api::{authenticated, extract_payload, reply},
    exchange::Exchange,
};
use chrono::{DateTime, Utc};
use model::{order::ActiveOrder, resource};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{hyper::StatusCode, Filter, Rejection, Reply};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CreateSellOrderPayload {
    /// `services/{id}` the quota is sold for.
    pub parent: String,
    pub ask_price: i64,
    pub quantity: i64,
    pub service_expire_time: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DeleteSellOrderPayload {
    /// `accounts/{id}/sell-orders/{id}`.
    pub name: String,
}

#[derive(Serialize)]
struct SellOrderReply {
    name: String,
    #[serde(flatten)]
    order: ActiveOrder,
}

impl From<ActiveOrder> for SellOrderReply {
    fn from(order: ActiveOrder) -> Self {
        Self {
            name: resource::format_sell_order(order.seller_id, order.order_id),
            order,
        }
    }
}

fn create_request() -> impl Filter<Extract = (CreateSellOrderPayload,), Error = Rejection> + Clone {
    warp::path!("sell-orders").and(warp::post()).and(extract_payload())
}

fn delete_request() -> impl Filter<Extract = (DeleteSellOrderPayload,), Error = Rejection> + Clone {
    warp::path!("sell-orders").and(warp::delete()).and(extract_payload())
}

pub fn create_sell_order(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    create_request().and(authenticated(exchange.clone())).and_then(
        move |payload: CreateSellOrderPayload, account_id: i64| {
            let exchange = exchange.clone();
            async move {
                let result = exchange
                    .create_sell_order(
                        account_id,
                        &payload.parent,
                        payload.ask_price,
                        payload.quantity,
                        payload.service_expire_time,
                    )
                    .await;
                Result::<_, Infallible>::Ok(reply(
                    result.map(SellOrderReply::from),
                    StatusCode::CREATED,
                ))
            }
        },
    )
}

pub fn delete_sell_order(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    delete_request().and(authenticated(exchange.clone())).and_then(
        move |payload: DeleteSellOrderPayload, account_id: i64| {
            let exchange = exchange.clone();
            async move {
                let result = exchange.delete_sell_order(account_id, &payload.name).await;
                Result::<_, Infallible>::Ok(reply(result, StatusCode::OK))
            }
        },
    )
}
