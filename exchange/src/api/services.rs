use crate::{
    api::{admin_only, authenticated, extract_payload, reply, ApiReject, PageQuery},
    error::Error,
    exchange::Exchange,
};
use model::{resource, service::Service, token_policy::TokenPolicy};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use uuid::Uuid;
use warp::{hyper::StatusCode, Filter, Rejection, Reply};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CreateServicePayload {
    pub global_id: Uuid,
    pub display_name: String,
    pub token_policy: TokenPolicy,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DeleteServicePayload {
    /// `services/{id}`.
    pub name: String,
}

#[derive(Serialize)]
struct ServiceReply {
    name: String,
    #[serde(flatten)]
    service: Service,
}

impl From<Service> for ServiceReply {
    fn from(service: Service) -> Self {
        Self {
            name: resource::format_service(service.service_id),
            service,
        }
    }
}

#[derive(Serialize)]
struct ListServicesReply {
    services: Vec<ServiceReply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_page_token: Option<String>,
}

fn list_request() -> impl Filter<Extract = (PageQuery,), Error = Rejection> + Clone {
    warp::path!("services").and(warp::get()).and(warp::query())
}

fn create_request() -> impl Filter<Extract = (CreateServicePayload,), Error = Rejection> + Clone {
    warp::path!("services").and(warp::post()).and(extract_payload())
}

fn delete_request() -> impl Filter<Extract = (DeleteServicePayload,), Error = Rejection> + Clone {
    warp::path!("services").and(warp::delete()).and(extract_payload())
}

pub fn list_services(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    list_request().and(authenticated(exchange.clone())).and_then(
        move |query: PageQuery, _account_id: i64| {
            let exchange = exchange.clone();
            async move {
                let result = exchange
                    .list_services(query.page_size, query.skip, query.page_token.as_deref())
                    .await
                    .map(|(services, next_page_token)| ListServicesReply {
                        services: services.into_iter().map(ServiceReply::from).collect(),
                        next_page_token,
                    });
                Result::<_, Infallible>::Ok(reply(result, StatusCode::OK))
            }
        },
    )
}

/// Service registration is open unless the whitelist flag restricts it to the
/// admin.
pub fn create_service(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let gatekeeper = exchange.clone();
    create_request()
        .and(authenticated(exchange.clone()))
        .and_then(move |payload: CreateServicePayload, account_id: i64| {
            let exchange = gatekeeper.clone();
            async move {
                if exchange.service_registration_requires_admin() {
                    match exchange.is_admin(account_id).await {
                        Ok(true) => (),
                        Ok(false) => {
                            return Err(warp::reject::custom(ApiReject(Error::PermissionDenied(
                                "service registration is restricted".to_string(),
                            ))))
                        }
                        Err(err) => return Err(warp::reject::custom(ApiReject(err))),
                    }
                }
                Ok(payload)
            }
        })
        .and_then(move |payload: CreateServicePayload| {
            let exchange = exchange.clone();
            async move {
                let result = exchange
                    .create_service(payload.global_id, &payload.display_name, payload.token_policy)
                    .await;
                Result::<_, Infallible>::Ok(reply(
                    result.map(ServiceReply::from),
                    StatusCode::CREATED,
                ))
            }
        })
}

pub fn delete_service(
    exchange: Arc<Exchange>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    delete_request().and(admin_only(exchange.clone())).and_then(
        move |payload: DeleteServicePayload, _admin_id: i64| {
            let exchange = exchange.clone();
            async move {
                let result = exchange.delete_service(&payload.name).await;
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
    async fn create_request_parses_the_policy() {
        let filter = create_request();
        let payload = serde_json::json!({
            "global_id": "86f9379b-ad74-4320-b503-5834c5167ec9",
            "display_name": "sample service",
            "token_policy": { "type": "product", "unit_price": 3 },
        });
        let parsed: CreateServicePayload = test_request()
            .path("/services")
            .method("POST")
            .header("content-type", "application/json")
            .json(&payload)
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(parsed.token_policy, TokenPolicy::product(3));
    }

    #[tokio::test]
    async fn unknown_policy_type_is_rejected_at_parse_time() {
        let filter = create_request();
        let payload = serde_json::json!({
            "global_id": "86f9379b-ad74-4320-b503-5834c5167ec9",
            "display_name": "sample service",
            "token_policy": { "type": "flat-rate", "unit_price": 3 },
        });
        assert!(test_request()
            .path("/services")
            .method("POST")
            .header("content-type", "application/json")
            .json(&payload)
            .filter(&filter)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn list_request_parses_pagination() {
        let filter = list_request();
        let query: PageQuery = test_request()
            .path("/services?page_size=10&skip=2&page_token=abc")
            .method("GET")
            .filter(&filter)
            .await
            .unwrap();
        assert_eq!(query.page_size, Some(10));
        assert_eq!(query.skip, Some(2));
        assert_eq!(query.page_token.as_deref(), Some("abc"));
    }
}
