use crate::{
    api::{authenticated, reply},
    exchange::Exchange,
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use warp::{hyper::StatusCode, Filter, Rejection, Reply};

use super::match_order::FulfilledOrderReply;

#[derive(Debug, Default, Deserialize)]
pub struct ListFulfilledOrdersQuery {
    /// Optional `services/{id}` to restrict the listing.
    pub parent: Option<String>,
    #[serde(default)]
    pub min_remaining_quantity: i64,
    pub page_size: Option<i64>,
    pub skip: Option<i64>,
    pub page_token: Option<String>,
}

#[derive(Serialize)]
struct ListFulfilledOrdersReply {
    fulfilled_orders: Vec<FulfilledOrderReply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_page_token: Option<String>,
}

fn request() -> impl Filter<Extract = (ListFulfilledOrdersQuery,), Error = Rejection> + Clone {
    warp::path!("fulfilled-orders").and(warp::get()).and(warp::query())
}

pub fn list_fulfilled_orders(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    request().and(authenticated(exchange.clone())).and_then(
        move |query: ListFulfilledOrdersQuery, account_id: i64| {
            let exchange = exchange.clone();
            async move {
                let result = exchange
                    .list_fulfilled_orders(
                        account_id,
                        query.parent.as_deref(),
                        query.min_remaining_quantity,
                        query.page_size,
                        query.skip,
                        query.page_token.as_deref(),
                    )
                    .await
                    .map(|(orders, next_page_token)| ListFulfilledOrdersReply {
                        fulfilled_orders: orders
                            .into_iter()
                            .map(FulfilledOrderReply::from)
                            .collect(),
                        next_page_token,
                    });
                Result::<_, Infallible>::Ok(reply(result, StatusCode::OK))
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::test::request as test_request;

    #[tokio::test]
    async fn list_request_parses() {
        let filter = request();
        let query: ListFulfilledOrdersQuery = test_request()
            .path("/fulfilled-orders?parent=services/3&min_remaining_quantity=1&page_size=20")
            .method("GET")
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(query.parent.as_deref(), Some("services/3"));
        assert_eq!(query.min_remaining_quantity, 1);
        assert_eq!(query.page_size, Some(20));
        assert_eq!(query.skip, None);
    }
}
