use rusqlite::Connection;
use serde_json::Value;

use super::model::{CreateItemPayload, Item, ItemFields, ItemSource, LocalItemFields, RemoteItemFields};
use crate::access;
use crate::error::{Error, Result};
use crate::store::{self, Table};

/// Create the item row and its source sub-row. Call inside a transaction.
pub fn register_item(
    conn: &Connection,
    payload: CreateItemPayload,
    owner: Option<&str>,
    image_meta: Value,
) -> Result<Item> {
    let fields = ItemFields {
        name: payload.name,
        meta: payload.meta.unwrap_or_else(|| Value::Object(Default::default())),
        image_meta,
        public: payload.public,
        owner: owner.map(str::to_string),
        session: payload.session,
        kind: payload.source.kind(),
    };
    let id = store::upsert(conn, payload.id.as_deref(), &fields)?;

    match &payload.source {
        ItemSource::Local { path } => {
            store::upsert(conn, Some(&id), &LocalItemFields { path: path.clone() })?;
        }
        ItemSource::Remote { url, remote_id } => {
            store::upsert(
                conn,
                Some(&id),
                &RemoteItemFields {
                    remote_id: remote_id.clone(),
                    url: url.clone(),
                },
            )?;
        }
    }

    if let Some(owner) = owner {
        access::grant(conn, owner, &id)?;
    }

    tracing::info!("Registered {} item {} ({})", fields.kind, id, fields.name);
    store::get(conn, &id)
}

pub fn can_view(conn: &Connection, item: &Item, requester: Option<&str>) -> Result<bool> {
    if item.public {
        return Ok(true);
    }
    match requester {
        Some(user) => access::has_grant(conn, user, &item.id),
        None => Ok(false),
    }
}

/// Fetch an item the requester may see. Hidden items read as missing.
pub fn load_visible(conn: &Connection, id: &str, requester: Option<&str>) -> Result<Item> {
    match store::find::<Item>(conn, id)? {
        Some(item) if can_view(conn, &item, requester)? => Ok(item),
        _ => Err(Error::not_found("item", id)),
    }
}

/// Remove an item with its layers, structures, overlays, grants and source row.
pub fn remove_item_cascade(conn: &mut Connection, id: &str, requester: Option<&str>) -> Result<usize> {
    let item = load_visible(conn, id, requester)?;
    if let Some(owner) = &item.owner {
        if requester != Some(owner.as_str()) {
            return Err(Error::validation("only the owner can delete an item"));
        }
    }

    store::in_transaction(conn, |tx| {
        let mut removed = 0;
        for (table, column) in [
            (Table::Structure, "item"),
            (Table::ImageOverlay, "item"),
            (Table::Layer, "item"),
            (Table::UserAccess, "item_id"),
        ] {
            removed += tx.execute(
                &format!("DELETE FROM {} WHERE {} = ?1", table.name(), column),
                [id],
            )?;
        }
        removed += store::remove(tx, Table::LocalItem, id, None, None)?;
        removed += store::remove(tx, Table::RemoteItem, id, None, None)?;
        removed += store::remove(tx, Table::Item, id, None, None)?;
        tracing::info!("Deleted item {} and {} dependent rows", id, removed - 1);
        Ok(removed)
    })
}
