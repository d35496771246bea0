use lambda_http::{http::StatusCode, Body, Error, Response};

use super::model::GrantPayload;
use super::service;
use crate::error::Error as AtomError;
use crate::items;
use crate::respond;
use crate::store::{self, Store};

fn check_owner(item: &items::Item, requester: Option<&str>) -> Result<(), AtomError> {
    match &item.owner {
        Some(owner) if requester != Some(owner.as_str()) => {
            Err(AtomError::validation("only the owner can change access"))
        }
        _ => Ok(()),
    }
}

pub async fn grant_access(
    store: &Store,
    item_id: &str,
    requester: Option<&str>,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let payload: GrantPayload = match serde_json::from_slice(body) {
        Ok(p) => p,
        Err(e) => return respond::error(&AtomError::validation(format!("invalid grant body: {}", e))),
    };
    let item_id = item_id.to_string();
    let requester = requester.map(str::to_string);

    let result = store
        .blocking(move |conn| {
            store::in_transaction(conn, |tx| {
                let item = items::load_visible(tx, &item_id, requester.as_deref())?;
                check_owner(&item, requester.as_deref())?;
                service::grant(tx, &payload.user_id, &item.id)
            })
        })
        .await;

    match result {
        Ok(grant) => {
            tracing::info!("Granted {} access to {}", grant.user_id, grant.item_id);
            respond::json(StatusCode::CREATED, &grant)
        }
        Err(e) => respond::error(&e),
    }
}

pub async fn revoke_access(
    store: &Store,
    item_id: &str,
    user_id: &str,
    requester: Option<&str>,
) -> Result<Response<Body>, Error> {
    let item_id = item_id.to_string();
    let user_id = user_id.to_string();
    let requester = requester.map(str::to_string);

    let result = store
        .blocking(move |conn| {
            let item = items::load_visible(conn, &item_id, requester.as_deref())?;
            check_owner(&item, requester.as_deref())?;
            service::revoke(conn, &user_id, &item.id)
        })
        .await;

    match result {
        Ok(_) => respond::no_content(),
        Err(e) => respond::error(&e),
    }
}
