use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::items::model::check_item;
use crate::store::{self, Fields, Record, Table};

/// Edge letting `user_id` see the non-public item `item_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub id: String,
    pub user_id: String,
    pub item_id: String,
    pub meta: Value,
    pub updated: String,
}

impl Record for AccessGrant {
    const TABLE: Table = Table::UserAccess;
    const COLUMNS: &'static str = "user_access.*";
    const FROM: &'static str = "user_access";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(AccessGrant {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            item_id: row.get("item_id")?,
            meta: row.get("meta")?,
            updated: row.get("updated")?,
        })
    }
}

pub(crate) struct GrantFields<'a> {
    pub user_id: &'a str,
    pub item_id: &'a str,
}

impl Fields for GrantFields<'_> {
    const TABLE: Table = Table::UserAccess;

    fn values(&self) -> Result<Vec<(&'static str, SqlValue)>> {
        Ok(vec![
            ("user_id", store::text(self.user_id)),
            ("item_id", store::text(self.item_id)),
            ("meta", SqlValue::Text("{}".to_string())),
        ])
    }

    fn check_references(&self, conn: &Connection) -> Result<()> {
        check_item(conn, self.item_id)
    }
}

#[derive(Debug, Deserialize)]
pub struct GrantPayload {
    pub user_id: String,
}
