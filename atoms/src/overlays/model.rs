use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::items::model::check_item;
use crate::layers::service::check_layer;
use crate::store::{self, Fields, Record, Table};
use crate::structures::model::bbox_from_row;

/// Raster layer placed over the base image by a pixel-space box.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageOverlay {
    pub id: String,
    pub image_src: String,
    pub properties: Value,
    pub layer: String,
    pub item: String,
    /// `[min_x, min_y, max_x, max_y]`
    pub bounds: [f64; 4],
    pub updated: String,
}

impl Record for ImageOverlay {
    const TABLE: Table = Table::ImageOverlay;
    const COLUMNS: &'static str = "image_overlay.*";
    const FROM: &'static str = "image_overlay";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ImageOverlay {
            id: row.get("id")?,
            image_src: row.get("image_src")?,
            properties: row.get("properties")?,
            layer: row.get("layer")?,
            item: row.get("item")?,
            bounds: bbox_from_row(row)?,
            updated: row.get("updated")?,
        })
    }
}

pub struct OverlayFields {
    pub image_src: String,
    pub properties: Value,
    pub layer: String,
    pub item: String,
    pub bounds: [f64; 4],
}

impl Fields for OverlayFields {
    const TABLE: Table = Table::ImageOverlay;

    fn values(&self) -> Result<Vec<(&'static str, SqlValue)>> {
        let [a, b, c, d] = self.bounds;
        if !self.bounds.iter().all(|v| v.is_finite()) {
            return Err(Error::InvalidGeometry("overlay bounds must be finite".to_string()));
        }
        Ok(vec![
            ("image_src", store::text(self.image_src.as_str())),
            ("properties", store::json_value(&self.properties)?),
            ("layer", store::text(self.layer.as_str())),
            ("item", store::text(self.item.as_str())),
            ("min_x", SqlValue::Real(a.min(c))),
            ("min_y", SqlValue::Real(b.min(d))),
            ("max_x", SqlValue::Real(a.max(c))),
            ("max_y", SqlValue::Real(b.max(d))),
        ])
    }

    fn check_references(&self, conn: &Connection) -> Result<()> {
        check_item(conn, &self.item)?;
        check_layer(conn, &self.layer, &self.item)
    }

    fn overwrite_scope(&self) -> Option<(&'static str, Option<&str>)> {
        Some(("item", Some(self.item.as_str())))
    }
}
