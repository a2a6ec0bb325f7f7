use crate::{
    api::{admin_only, reply},
    exchange::Exchange,
};
use serde::Serialize;
use std::{convert::Infallible, sync::Arc};
use warp::{hyper::StatusCode, Filter, Rejection, Reply};

#[derive(Serialize)]
struct PruneAccountsReply {
    account_ids: Vec<i64>,
}

#[derive(Serialize)]
struct PruneFulfilledOrdersReply {
    sell_orders_cleaned: usize,
    fulfilled_orders_cleaned: usize,
}

pub fn prune_accounts(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("accounts" / "prune")
        .and(warp::post())
        .and(admin_only(exchange.clone()))
        .and_then(move |_admin_id: i64| {
            let exchange = exchange.clone();
            async move {
                let result = exchange
                    .prune_accounts()
                    .await
                    .map(|account_ids| PruneAccountsReply { account_ids });
                Result::<_, Infallible>::Ok(reply(result, StatusCode::OK))
            }
        })
}

pub fn batch_prune_fulfilled_orders(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("fulfilled-orders" / "prune")
        .and(warp::post())
        .and(admin_only(exchange.clone()))
        .and_then(move |_admin_id: i64| {
            let exchange = exchange.clone();
            async move {
                let result = exchange.batch_prune_fulfilled_orders().await.map(
                    |(sell_orders_cleaned, fulfilled_orders_cleaned)| PruneFulfilledOrdersReply {
                        sell_orders_cleaned,
                        fulfilled_orders_cleaned,
                    },
                );
                Result::<_, Infallible>::Ok(reply(result, StatusCode::OK))
            }
        })
}
