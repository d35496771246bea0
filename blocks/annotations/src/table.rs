use std::collections::HashMap;

use lambda_http::{http::StatusCode, Body, Error, Response};
use rusqlite::Connection;
use serde_json::{json, Value};
use slidemap_atoms::error::Error as AtomError;
use slidemap_atoms::structures::StructureRow;
use slidemap_atoms::{items, layers, respond, structures, Store};

use crate::properties::{flatten_properties, PropertyConfig, ANNOTATION_ID, ANNOTATION_NAME};
use crate::types::PropertyTable;

const STRUCTURE_ID: &str = "structure.id";
const ITEM_ID: &str = "item.id";
const ITEM_NAME: &str = "item.name";
const BBOX_KEYS: [&str; 4] = ["bbox.x0", "bbox.y0", "bbox.x1", "bbox.y1"];

/// Which layers to export.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerSelection {
    All,
    /// Layer ids or names.
    Only(Vec<String>),
}

impl LayerSelection {
    pub fn parse(raw: Option<&str>) -> Result<Self, AtomError> {
        let refs = match raw {
            None => return Ok(LayerSelection::All),
            Some(raw) => parse_list(raw)?,
        };
        if refs.is_empty() || refs.iter().any(|r| r == "all" || r == "__all__") {
            Ok(LayerSelection::All)
        } else {
            Ok(LayerSelection::Only(refs))
        }
    }
}

/// Comma separated, or a JSON list of strings.
pub fn parse_list(raw: &str) -> Result<Vec<String>, AtomError> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        return serde_json::from_str(raw)
            .map_err(|e| AtomError::validation(format!("expected a list of strings: {}", e)));
    }
    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

fn synthetic(row: &StructureRow, key: &str) -> Option<Value> {
    let s = &row.structure;
    Some(match key {
        ANNOTATION_NAME => json!(row.layer_name),
        ANNOTATION_ID => json!(s.layer),
        STRUCTURE_ID => json!(s.id),
        ITEM_ID => json!(s.item),
        ITEM_NAME => json!(row.item_name),
        _ => {
            let i = BBOX_KEYS.iter().position(|k| *k == key)?;
            json!(s.bbox[i])
        }
    })
}

/// Build the `{columns, rows}` table for an item's structures.
///
/// Without explicit keys every synthetic key comes first, followed by every
/// property key in the order it was first seen.
pub fn property_table(
    conn: &Connection,
    item_id: &str,
    keys: Option<Vec<String>>,
    selection: &LayerSelection,
    config: &PropertyConfig,
) -> slidemap_atoms::Result<PropertyTable> {
    let layer_ids = match selection {
        LayerSelection::All => None,
        LayerSelection::Only(refs) => Some(
            layers::layers_for_item(conn, item_id)?
                .into_iter()
                .filter(|l| refs.iter().any(|r| *r == l.id || *r == l.name))
                .map(|l| l.id)
                .collect::<Vec<_>>(),
        ),
    };
    let rows = structures::structure_property_data(conn, item_id, layer_ids.as_deref(), None)?;

    let flattened: Vec<HashMap<String, &Value>> = rows
        .iter()
        .map(|r| flatten_properties(&r.structure.properties, config).into_iter().collect())
        .collect();

    let columns = match keys {
        Some(keys) => keys,
        None => {
            let mut columns: Vec<String> = [ANNOTATION_ID, ANNOTATION_NAME, STRUCTURE_ID, ITEM_ID, ITEM_NAME]
                .into_iter()
                .chain(BBOX_KEYS)
                .map(str::to_string)
                .collect();
            for r in &rows {
                for (key, _) in flatten_properties(&r.structure.properties, config) {
                    if !columns.contains(&key) {
                        columns.push(key);
                    }
                }
            }
            columns
        }
    };

    let rows: Vec<Vec<Value>> = rows
        .iter()
        .zip(&flattened)
        .map(|(row, props)| {
            columns
                .iter()
                .map(|key| {
                    synthetic(row, key)
                        .or_else(|| props.get(key).map(|v| (*v).clone()))
                        .unwrap_or(Value::Null)
                })
                .collect()
        })
        .collect();

    Ok(PropertyTable { columns, rows })
}

/// GET /{id}/annotations/data?include_keys=...&include_anns=...
pub async fn get_property_table(
    store: &Store,
    item_id: &str,
    requester: Option<&str>,
    include_keys: Option<&str>,
    include_anns: Option<&str>,
    config: &PropertyConfig,
) -> Result<Response<Body>, Error> {
    let parsed = include_keys
        .map(parse_list)
        .transpose()
        .and_then(|keys| Ok((keys, LayerSelection::parse(include_anns)?)));
    let (keys, selection) = match parsed {
        Ok(p) => p,
        Err(e) => return respond::error(&e),
    };

    let id = item_id.to_string();
    let requester = requester.map(str::to_string);
    let config = config.clone();
    let result = store
        .blocking(move |conn| {
            let item = items::load_visible(conn, &id, requester.as_deref())?;
            property_table(conn, &item.id, keys, &selection, &config)
        })
        .await;

    match result {
        Ok(table) => respond::json(StatusCode::OK, &table),
        Err(e) => respond::error(&e),
    }
}
