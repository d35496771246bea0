use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::items::model::check_item;
use crate::layers::service::check_layer;
use crate::store::{self, Fields, Record, Table};

/// One vector geometry in full-resolution pixel space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Structure {
    pub id: String,
    pub geom: Value,
    pub properties: Value,
    pub layer: String,
    pub item: String,
    /// `[min_x, min_y, max_x, max_y]`
    pub bbox: [f64; 4],
    pub updated: String,
}

pub(crate) fn bbox_from_row(row: &Row<'_>) -> rusqlite::Result<[f64; 4]> {
    Ok([
        row.get("min_x")?,
        row.get("min_y")?,
        row.get("max_x")?,
        row.get("max_y")?,
    ])
}

impl Record for Structure {
    const TABLE: Table = Table::Structure;
    const COLUMNS: &'static str = "structure.*";
    const FROM: &'static str = "structure";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Structure {
            id: row.get("id")?,
            geom: row.get("geom")?,
            properties: row.get("properties")?,
            layer: row.get("layer")?,
            item: row.get("item")?,
            bbox: bbox_from_row(row)?,
            updated: row.get("updated")?,
        })
    }
}

pub struct StructureFields {
    pub geom: Value,
    pub properties: Value,
    pub layer: String,
    pub item: String,
}

impl Fields for StructureFields {
    const TABLE: Table = Table::Structure;

    fn values(&self) -> Result<Vec<(&'static str, SqlValue)>> {
        let [min_x, min_y, max_x, max_y] = geometry_bounds(&self.geom)
            .ok_or_else(|| Error::InvalidGeometry("geometry has no finite coordinates".to_string()))?;
        Ok(vec![
            ("geom", store::json_value(&self.geom)?),
            ("properties", store::json_value(&self.properties)?),
            ("layer", store::text(self.layer.as_str())),
            ("item", store::text(self.item.as_str())),
            ("min_x", SqlValue::Real(min_x)),
            ("min_y", SqlValue::Real(min_y)),
            ("max_x", SqlValue::Real(max_x)),
            ("max_y", SqlValue::Real(max_y)),
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

/// Structure joined with its layer and item names, for tabular export.
#[derive(Debug, Clone, Serialize)]
pub struct StructureRow {
    pub structure: Structure,
    pub layer_name: String,
    pub item_name: String,
}

/// Bounding box of every finite position in a GeoJSON geometry.
pub fn geometry_bounds(geom: &Value) -> Option<[f64; 4]> {
    let mut bounds: Option<[f64; 4]> = None;
    visit_positions(geom, &mut |x, y| {
        let b = bounds.get_or_insert([x, y, x, y]);
        b[0] = b[0].min(x);
        b[1] = b[1].min(y);
        b[2] = b[2].max(x);
        b[3] = b[3].max(y);
    });
    bounds
}

fn visit_positions(geom: &Value, f: &mut impl FnMut(f64, f64)) {
    if let Some(children) = geom.get("geometries").and_then(Value::as_array) {
        for child in children {
            visit_positions(child, f);
        }
    }
    if let Some(coords) = geom.get("coordinates") {
        visit_coordinates(coords, f);
    }
}

fn visit_coordinates(value: &Value, f: &mut impl FnMut(f64, f64)) {
    let Some(array) = value.as_array() else {
        return;
    };
    match (array.first().and_then(Value::as_f64), array.get(1).and_then(Value::as_f64)) {
        (Some(x), Some(y)) => {
            if x.is_finite() && y.is_finite() {
                f(x, y);
            }
        }
        _ => {
            for child in array {
                visit_coordinates(child, f);
            }
        }
    }
}
