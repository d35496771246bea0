use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::store::{self, Fields, Record, Table};

/// Where an item's pixels come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemSource {
    Local { path: String },
    Remote { url: String, remote_id: String },
}

impl ItemSource {
    pub const LOCAL: &'static str = "local";
    pub const REMOTE: &'static str = "remote";

    pub fn kind(&self) -> &'static str {
        match self {
            ItemSource::Local { .. } => Self::LOCAL,
            ItemSource::Remote { .. } => Self::REMOTE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub meta: Value,
    pub image_meta: Value,
    pub public: bool,
    pub owner: Option<String>,
    pub session: Option<String>,
    #[serde(flatten)]
    pub source: ItemSource,
    pub updated: String,
}

impl Record for Item {
    const TABLE: Table = Table::Item;
    const COLUMNS: &'static str =
        "item.*, li.path AS path, ri.url AS url, ri.remote_id AS remote_id";
    const FROM: &'static str = "item \
        LEFT JOIN local_item li ON li.item_id = item.id \
        LEFT JOIN remote_item ri ON ri.item_id = item.id";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = row.get("kind")?;
        let source = if kind == ItemSource::REMOTE {
            ItemSource::Remote {
                url: row.get::<_, Option<String>>("url")?.unwrap_or_default(),
                remote_id: row.get::<_, Option<String>>("remote_id")?.unwrap_or_default(),
            }
        } else {
            ItemSource::Local {
                path: row.get::<_, Option<String>>("path")?.unwrap_or_default(),
            }
        };
        Ok(Item {
            id: row.get("id")?,
            name: row.get("name")?,
            meta: row.get("meta")?,
            image_meta: row.get("image_meta")?,
            public: row.get("public")?,
            owner: row.get("owner")?,
            session: row.get("session")?,
            source,
            updated: row.get("updated")?,
        })
    }
}

pub struct ItemFields {
    pub name: String,
    pub meta: Value,
    pub image_meta: Value,
    pub public: bool,
    pub owner: Option<String>,
    pub session: Option<String>,
    pub kind: &'static str,
}

impl Fields for ItemFields {
    const TABLE: Table = Table::Item;

    fn values(&self) -> Result<Vec<(&'static str, SqlValue)>> {
        Ok(vec![
            ("name", store::text(self.name.as_str())),
            ("meta", store::json_value(&self.meta)?),
            ("image_meta", store::json_value(&self.image_meta)?),
            ("public", SqlValue::Integer(self.public as i64)),
            ("owner", store::optional_text(self.owner.as_deref())),
            ("session", store::optional_text(self.session.as_deref())),
            ("kind", store::text(self.kind)),
        ])
    }

    fn overwrite_scope(&self) -> Option<(&'static str, Option<&str>)> {
        Some(("owner", self.owner.as_deref()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LocalItem {
    pub item_id: String,
    pub path: String,
    pub updated: String,
}

impl Record for LocalItem {
    const TABLE: Table = Table::LocalItem;
    const COLUMNS: &'static str = "local_item.*";
    const FROM: &'static str = "local_item";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(LocalItem {
            item_id: row.get("item_id")?,
            path: row.get("path")?,
            updated: row.get("updated")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteItem {
    pub item_id: String,
    pub remote_id: String,
    pub url: String,
    pub updated: String,
}

impl Record for RemoteItem {
    const TABLE: Table = Table::RemoteItem;
    const COLUMNS: &'static str = "remote_item.*";
    const FROM: &'static str = "remote_item";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RemoteItem {
            item_id: row.get("item_id")?,
            remote_id: row.get("remote_id")?,
            url: row.get("url")?,
            updated: row.get("updated")?,
        })
    }
}

/// Sub-row keyed by its item id.
pub struct LocalItemFields {
    pub path: String,
}

impl Fields for LocalItemFields {
    const TABLE: Table = Table::LocalItem;

    fn values(&self) -> Result<Vec<(&'static str, SqlValue)>> {
        Ok(vec![("path", store::text(self.path.as_str()))])
    }
}

pub struct RemoteItemFields {
    pub remote_id: String,
    pub url: String,
}

impl Fields for RemoteItemFields {
    const TABLE: Table = Table::RemoteItem;

    fn values(&self) -> Result<Vec<(&'static str, SqlValue)>> {
        Ok(vec![
            ("remote_id", store::text(self.remote_id.as_str())),
            ("url", store::text(self.url.as_str())),
        ])
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateItemPayload {
    pub id: Option<String>,
    pub name: String,
    #[serde(flatten)]
    pub source: ItemSource,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub meta: Option<Value>,
    #[serde(default)]
    pub session: Option<String>,
}

/// Sub-rows must point at an existing item.
pub(crate) fn check_item(conn: &Connection, item_id: &str) -> Result<()> {
    if store::exists(conn, Table::Item, item_id)? {
        Ok(())
    } else {
        Err(crate::Error::not_found("item", item_id))
    }
}
