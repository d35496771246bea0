use std::path::PathBuf;

use lambda_http::{http::StatusCode, Body, Error, Response};
use serde_json::Value;

use super::model::{CreateItemPayload, ItemSource};
use super::service;
use crate::error::Error as AtomError;
use crate::respond;
use crate::store::{self, offload, Store};
use crate::tiles::{open_reader, TileSourceCache};

/// Probe a local slide so its pyramid metadata is stored with the item.
async fn probe_image_meta(source: &ItemSource, tile_size: u32) -> Result<Value, AtomError> {
    match source {
        ItemSource::Local { path } => {
            let path = PathBuf::from(path);
            let metadata = offload(move || Ok(open_reader(&path, tile_size)?.metadata())).await?;
            Ok(serde_json::to_value(metadata)?)
        }
        ItemSource::Remote { .. } => Ok(Value::Object(Default::default())),
    }
}

/// POST /items
pub async fn create_item(
    store: &Store,
    tile_size: u32,
    requester: Option<&str>,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let payload: CreateItemPayload = match serde_json::from_slice(body) {
        Ok(p) => p,
        Err(e) => return respond::error(&AtomError::validation(format!("invalid item body: {}", e))),
    };
    tracing::info!("create_item: name={} kind={}", payload.name, payload.source.kind());

    let image_meta = match probe_image_meta(&payload.source, tile_size).await {
        Ok(meta) => meta,
        Err(e) => return respond::error(&e),
    };
    let owner = requester.map(str::to_string);
    let result = store
        .blocking(move |conn| {
            store::in_transaction(conn, |tx| {
                service::register_item(tx, payload, owner.as_deref(), image_meta)
            })
        })
        .await;

    match result {
        Ok(item) => respond::json(StatusCode::CREATED, &item),
        Err(e) => respond::error(&e),
    }
}

/// DELETE /{id}
pub async fn delete_item(
    store: &Store,
    cache: &TileSourceCache,
    item_id: &str,
    requester: Option<&str>,
) -> Result<Response<Body>, Error> {
    let id = item_id.to_string();
    let requester = requester.map(str::to_string);
    let result = store
        .blocking(move |conn| service::remove_item_cascade(conn, &id, requester.as_deref()))
        .await;

    match result {
        Ok(_) => {
            if let Err(e) = cache.evict_item(item_id) {
                tracing::warn!("Could not evict tile sources for {}: {}", item_id, e);
            }
            respond::no_content()
        }
        Err(e) => respond::error(&e),
    }
}
