use crate::{
    api::{authenticated, extract_payload, reply},
    exchange::Exchange,
};
use chrono::{DateTime, Utc};
use model::{order::FulfilledOrder, resource};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{hyper::StatusCode, Filter, Rejection, Reply};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MatchOrderPayload {
    /// `services/{id}` to buy quota of.
    pub parent: String,
    pub bid_price: i64,
    pub quantity: i64,
    pub min_expire_time: DateTime<Utc>,
}

#[derive(Serialize)]
pub(super) struct FulfilledOrderReply {
    pub name: String,
    #[serde(flatten)]
    pub order: FulfilledOrder,
}

impl From<FulfilledOrder> for FulfilledOrderReply {
    fn from(order: FulfilledOrder) -> Self {
        Self {
            name: resource::format_fulfilled_order(order.service_id, order.order_fulfillment_id),
            order,
        }
    }
}

fn request() -> impl Filter<Extract = (MatchOrderPayload,), Error = Rejection> + Clone {
    warp::path!("match-orders").and(warp::post()).and(extract_payload())
}

pub fn match_order(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    request().and(authenticated(exchange.clone())).and_then(
        move |payload: MatchOrderPayload, account_id: i64| {
            let exchange = exchange.clone();
            async move {
                let result = exchange
                    .match_order(
                        account_id,
                        &payload.parent,
                        payload.bid_price,
                        payload.quantity,
                        payload.min_expire_time,
                    )
                    .await;
                Result::<_, Infallible>::Ok(reply(
                    result.map(FulfilledOrderReply::from),
                    StatusCode::CREATED,
                ))
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::test::request as test_request;

    #[tokio::test]
    async fn match_request_parses() {
        let filter = request();
        let payload = MatchOrderPayload {
            parent: "services/3".to_string(),
            bid_price: 90,
            quantity: 10,
            min_expire_time: Utc::now(),
        };
        let parsed = test_request()
            .path("/match-orders")
            .method("POST")
            .header("content-type", "application/json")
            .json(&payload)
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn fulfilled_order_reply_carries_the_resource_name() {
        let order = FulfilledOrder {
            order_fulfillment_id: 9,
            order_id: 5,
            service_id: 3,
            buyer_id: 2,
            seller_id: 1,
            deal_price: 80,
            deal_quantity: 10,
            remaining_quantity: 10,
            deal_time: Utc::now(),
            service_expire_time: Utc::now(),
        };
        let value = serde_json::to_value(FulfilledOrderReply::from(order)).unwrap();
        assert_eq!(value["name"], "services/3/fulfilled-orders/9");
        assert_eq!(value["deal_price"], 80);
    }
}
