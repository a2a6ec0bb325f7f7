//! Canonical resource names used on the wire: `accounts/{id}`,
//! `accounts/{id}/sell-orders/{id}`, `accounts/{id}/withdraws/{id}`,
//! `services/{id}` and `services/{id}/fulfilled-orders/{id}`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("resource name {name:?} does not match {pattern:?}")]
pub struct ResourceNameError {
    pub name: String,
    pub pattern: String,
}

pub fn format_account(account_id: i64) -> String {
    format!("accounts/{}", account_id)
}

pub fn format_service(service_id: i64) -> String {
    format!("services/{}", service_id)
}

pub fn format_sell_order(account_id: i64, order_id: i64) -> String {
    format!("accounts/{}/sell-orders/{}", account_id, order_id)
}

pub fn format_withdrawal(account_id: i64, withdrawal_id: i64) -> String {
    format!("accounts/{}/withdraws/{}", account_id, withdrawal_id)
}

pub fn format_fulfilled_order(service_id: i64, order_fulfillment_id: i64) -> String {
    format!("services/{}/fulfilled-orders/{}", service_id, order_fulfillment_id)
}

/// Parses `{collection}/{id}` into the id. Ids must be positive.
pub fn parse_one(name: &str, collection: &str) -> Result<i64, ResourceNameError> {
    let ids = parse(name, &[collection])?;
    Ok(ids[0])
}

/// Parses `{outer}/{id}/{inner}/{id}` into both ids. Ids must be positive.
pub fn parse_two(name: &str, outer: &str, inner: &str) -> Result<(i64, i64), ResourceNameError> {
    let ids = parse(name, &[outer, inner])?;
    Ok((ids[0], ids[1]))
}

fn parse(name: &str, collections: &[&str]) -> Result<Vec<i64>, ResourceNameError> {
    let error = || ResourceNameError {
        name: name.to_string(),
        pattern: collections.join("/{id}/") + "/{id}",
    };
    let mut segments = name.split('/');
    let mut ids = Vec::with_capacity(collections.len());
    for collection in collections {
        if segments.next() != Some(collection) {
            return Err(error());
        }
        let id: i64 = segments
            .next()
            .and_then(|segment| segment.parse().ok())
            .ok_or_else(error)?;
        if id <= 0 {
            return Err(error());
        }
        ids.push(id);
    }
    if segments.next().is_some() {
        return Err(error());
    }
    Ok(ids)
}
