use rusqlite::Connection;

use super::model::ImageOverlay;
use crate::error::Result;
use crate::store::Record;

pub fn overlays_for_layer(conn: &Connection, layer_id: &str) -> Result<Vec<ImageOverlay>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} WHERE image_overlay.layer = ?1 ORDER BY image_overlay.rowid",
        ImageOverlay::COLUMNS,
        ImageOverlay::FROM
    ))?;
    let rows = stmt.query_map([layer_id], |row| ImageOverlay::from_row(row))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
