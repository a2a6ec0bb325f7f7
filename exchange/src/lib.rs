pub mod api;
pub mod arguments;
pub mod auth;
pub mod database;
pub mod error;
pub mod exchange;
pub mod maintenance;
pub mod pagination;
pub mod payment;
pub mod quota_token;
pub mod ratelimit;
pub mod sui;

use crate::exchange::Exchange;
use std::{net::SocketAddr, sync::Arc};
use tokio::{task, task::JoinHandle};
use warp::Filter;

pub fn serve_task(exchange: Arc<Exchange>, address: SocketAddr) -> JoinHandle<()> {
    let filter = api::handle_all_routes(exchange).map(|reply| {
        warp::reply::with_header(reply, "Access-Control-Allow-Origin", "*")
    });
    tracing::info!(%address, "serving the exchange");
    task::spawn(warp::serve(filter).bind(address))
}
