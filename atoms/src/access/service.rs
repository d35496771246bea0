use rusqlite::{Connection, OptionalExtension};

use super::model::{AccessGrant, GrantFields};
use crate::error::{Error, Result};
use crate::store;

pub fn has_grant(conn: &Connection, user_id: &str, item_id: &str) -> Result<bool> {
    Ok(grant_id(conn, user_id, item_id)?.is_some())
}

fn grant_id(conn: &Connection, user_id: &str, item_id: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT id FROM user_access WHERE user_id = ?1 AND item_id = ?2",
            [user_id, item_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Grant `user_id` access to `item_id`. Granting twice keeps one edge.
pub fn grant(conn: &Connection, user_id: &str, item_id: &str) -> Result<AccessGrant> {
    if user_id.trim().is_empty() {
        return Err(Error::validation("user_id must not be empty"));
    }
    let existing = grant_id(conn, user_id, item_id)?;
    let id = store::upsert(conn, existing.as_deref(), &GrantFields { user_id, item_id })?;
    store::get(conn, &id)
}

pub fn revoke(conn: &Connection, user_id: &str, item_id: &str) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM user_access WHERE user_id = ?1 AND item_id = ?2",
        [user_id, item_id],
    )?)
}
