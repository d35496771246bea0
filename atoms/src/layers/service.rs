use rusqlite::Connection;

use super::model::Layer;
use crate::error::{Error, Result};
use crate::store::{self, Record};

/// Layers of one item in import order.
pub fn layers_for_item(conn: &Connection, item_id: &str) -> Result<Vec<Layer>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} WHERE layer.item = ?1 ORDER BY layer.rowid",
        Layer::COLUMNS,
        Layer::FROM
    ))?;
    let rows = stmt.query_map([item_id], |row| Layer::from_row(row))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Resolve a layer reference given either its id or its name.
pub fn find_layer(conn: &Connection, item_id: &str, id_or_name: &str) -> Result<Layer> {
    layers_for_item(conn, item_id)?
        .into_iter()
        .find(|l| l.id == id_or_name || l.name == id_or_name)
        .ok_or_else(|| Error::not_found("layer", id_or_name))
}

/// Layer must exist and belong to `item_id`.
pub(crate) fn check_layer(conn: &Connection, layer_id: &str, item_id: &str) -> Result<()> {
    match store::find::<Layer>(conn, layer_id)? {
        Some(layer) if layer.item == item_id => Ok(()),
        Some(layer) => Err(Error::validation(format!(
            "layer {} belongs to item {}, not {}",
            layer.id, layer.item, item_id
        ))),
        None => Err(Error::not_found("layer", layer_id)),
    }
}
