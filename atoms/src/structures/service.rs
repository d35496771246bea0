use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};

use super::model::{Structure, StructureRow};
use crate::error::Result;
use crate::store::Record;

/// Structures of one item whose stored bounding box overlaps `bbox`.
///
/// This is the coarse pass; exact intersection is left to the caller. With no
/// `bbox` every structure of the item (or of `layer`) is returned.
pub fn structures_overlapping(
    conn: &Connection,
    item_id: &str,
    layer: Option<&str>,
    bbox: Option<[f64; 4]>,
) -> Result<Vec<Structure>> {
    let mut sql = format!("SELECT {} FROM {} WHERE structure.item = ?1", Structure::COLUMNS, Structure::FROM);
    let mut params = vec![SqlValue::Text(item_id.to_string())];
    if let Some(layer) = layer {
        params.push(SqlValue::Text(layer.to_string()));
        sql.push_str(&format!(" AND structure.layer = ?{}", params.len()));
    }
    if let Some([min_x, min_y, max_x, max_y]) = bbox {
        let n = params.len();
        sql.push_str(&format!(
            " AND structure.max_x >= ?{} AND structure.min_x <= ?{} AND structure.max_y >= ?{} AND structure.min_y <= ?{}",
            n + 1,
            n + 2,
            n + 3,
            n + 4
        ));
        params.extend([min_x, max_x, min_y, max_y].map(SqlValue::Real));
    }
    sql.push_str(" ORDER BY structure.rowid");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params), |row| Structure::from_row(row))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Structures of an item joined with layer and item names.
///
/// `layers` and `structures` narrow the result by id when given.
pub fn structure_property_data(
    conn: &Connection,
    item_id: &str,
    layers: Option<&[String]>,
    structures: Option<&[String]>,
) -> Result<Vec<StructureRow>> {
    let mut sql = String::from(
        "SELECT structure.*, layer.name AS layer_name, item.name AS item_name \
         FROM structure \
         JOIN layer ON layer.id = structure.layer \
         JOIN item ON item.id = structure.item \
         WHERE structure.item = ?1",
    );
    let mut params = vec![SqlValue::Text(item_id.to_string())];
    for (column, ids) in [("structure.layer", layers), ("structure.id", structures)] {
        if let Some(ids) = ids {
            let placeholders = ids
                .iter()
                .map(|id| {
                    params.push(SqlValue::Text(id.clone()));
                    format!("?{}", params.len())
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" AND {} IN ({})", column, placeholders));
        }
    }
    sql.push_str(" ORDER BY layer.rowid, structure.rowid");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params), |row| {
        Ok(StructureRow {
            structure: Structure::from_row(row)?,
            layer_name: row.get("layer_name")?,
            item_name: row.get("item_name")?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{ItemFields, ItemSource};
    use crate::layers::LayerFields;
    use crate::structures::StructureFields;
    use crate::store::Store;
    use crate::Error;
    use serde_json::{json, Value};

    fn square(x: f64, y: f64, size: f64) -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[[x, y], [x + size, y], [x + size, y + size], [x, y + size], [x, y]]]
        })
    }

    fn seed(store: &Store) -> (String, String) {
        let item = store
            .get_or_create(
                Some("item-1"),
                &ItemFields {
                    name: "kidney".to_string(),
                    meta: json!({}),
                    image_meta: json!({}),
                    public: true,
                    owner: None,
                    session: None,
                    kind: ItemSource::LOCAL,
                },
            )
            .unwrap();
        let layer = store
            .get_or_create(
                Some("layer-1"),
                &LayerFields {
                    name: "Glomeruli".to_string(),
                    item: item.clone(),
                    meta: json!({}),
                },
            )
            .unwrap();
        for (id, x) in [("s-in", 10.0), ("s-edge", 90.0), ("s-out", 500.0)] {
            store
                .get_or_create(
                    Some(id),
                    &StructureFields {
                        geom: square(x, x, 20.0),
                        properties: json!({"area": x}),
                        layer: layer.clone(),
                        item: item.clone(),
                    },
                )
                .unwrap();
        }
        (item, layer)
    }

    #[test]
    fn overlapping_uses_stored_bounds() {
        let store = Store::open_in_memory().unwrap();
        let (item, _) = seed(&store);
        let hits = store
            .with_conn(|c| structures_overlapping(c, &item, None, Some([0.0, 0.0, 100.0, 100.0])))
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s-in", "s-edge"]);
    }

    #[test]
    fn overlapping_without_bbox_returns_all() {
        let store = Store::open_in_memory().unwrap();
        let (item, layer) = seed(&store);
        let all = store
            .with_conn(|c| structures_overlapping(c, &item, Some(&layer), None))
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].bbox, [500.0, 500.0, 520.0, 520.0]);
    }

    #[test]
    fn property_data_carries_names() {
        let store = Store::open_in_memory().unwrap();
        let (item, _) = seed(&store);
        let only = vec!["s-out".to_string()];
        let rows = store
            .with_conn(|c| structure_property_data(c, &item, None, Some(only.as_slice())))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].layer_name, "Glomeruli");
        assert_eq!(rows[0].item_name, "kidney");
        assert_eq!(rows[0].structure.properties["area"], 500.0);
    }

    #[test]
    fn structure_layer_must_belong_to_item() {
        let store = Store::open_in_memory().unwrap();
        seed(&store);
        store
            .get_or_create(
                Some("item-2"),
                &ItemFields {
                    name: "liver".to_string(),
                    meta: json!({}),
                    image_meta: json!({}),
                    public: true,
                    owner: None,
                    session: None,
                    kind: ItemSource::LOCAL,
                },
            )
            .unwrap();
        let err = store
            .get_or_create(
                None,
                &StructureFields {
                    geom: square(0.0, 0.0, 1.0),
                    properties: json!({}),
                    layer: "layer-1".to_string(),
                    item: "item-2".to_string(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn geometry_without_coordinates_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let (item, layer) = seed(&store);
        let err = store
            .get_or_create(
                None,
                &StructureFields {
                    geom: json!({"type": "Polygon", "coordinates": []}),
                    properties: json!({}),
                    layer,
                    item,
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry(_)));
    }
}
