use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::items::model::check_item;
use crate::store::{self, Fields, Record, Table};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub id: String,
    pub name: String,
    pub item: String,
    pub meta: Value,
    pub updated: String,
}

impl Record for Layer {
    const TABLE: Table = Table::Layer;
    const COLUMNS: &'static str = "layer.*";
    const FROM: &'static str = "layer";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Layer {
            id: row.get("id")?,
            name: row.get("name")?,
            item: row.get("item")?,
            meta: row.get("meta")?,
            updated: row.get("updated")?,
        })
    }
}

pub struct LayerFields {
    pub name: String,
    pub item: String,
    pub meta: Value,
}

impl Fields for LayerFields {
    const TABLE: Table = Table::Layer;

    fn values(&self) -> Result<Vec<(&'static str, SqlValue)>> {
        Ok(vec![
            ("name", store::text(self.name.as_str())),
            ("item", store::text(self.item.as_str())),
            ("meta", store::json_value(&self.meta)?),
        ])
    }

    fn check_references(&self, conn: &Connection) -> Result<()> {
        check_item(conn, &self.item)
    }

    fn overwrite_scope(&self) -> Option<(&'static str, Option<&str>)> {
        Some(("item", Some(self.item.as_str())))
    }
}
