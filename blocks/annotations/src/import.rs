use rusqlite::{Connection, Transaction};
use serde_json::{json, Value};
use slidemap_atoms::error::Error as AtomError;
use slidemap_atoms::layers::LayerFields;
use slidemap_atoms::overlays::OverlayFields;
use slidemap_atoms::store;
use slidemap_atoms::structures::StructureFields;

use crate::types::{AnnotationLayer, FailedLayer, ImportSummary};

#[derive(Debug, Default)]
struct LayerCounts {
    structures: usize,
    overlays: usize,
}

/// Feature properties minus the `_id` key, which becomes the row id.
fn split_feature_id(properties: &Value) -> (Option<String>, Value) {
    match properties {
        Value::Object(map) => {
            let mut map = map.clone();
            let id = map.remove("_id").and_then(|v| v.as_str().map(str::to_string));
            (id, Value::Object(map))
        }
        Value::Null => (None, json!({})),
        other => (None, other.clone()),
    }
}

fn import_layer(tx: &Transaction<'_>, item_id: &str, layer: AnnotationLayer) -> slidemap_atoms::Result<LayerCounts> {
    let props = layer.properties().clone();
    let layer_id = store::upsert(
        tx,
        props.id.as_deref(),
        &LayerFields {
            name: props.name.clone(),
            item: item_id.to_string(),
            meta: json!({}),
        },
    )?;

    let mut counts = LayerCounts::default();
    match layer {
        AnnotationLayer::Structures(fc) => {
            for feature in fc.features {
                let (id, properties) = split_feature_id(&feature.properties);
                let fields = StructureFields {
                    geom: feature.geometry,
                    properties,
                    layer: layer_id.clone(),
                    item: item_id.to_string(),
                };
                match store::upsert(tx, id.as_deref(), &fields) {
                    Ok(_) => counts.structures += 1,
                    Err(AtomError::InvalidGeometry(reason)) => {
                        tracing::warn!("Skipping feature in layer {}: {}", props.name, reason);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        AnnotationLayer::Overlay(overlay) => {
            store::upsert(
                tx,
                None,
                &OverlayFields {
                    image_src: overlay.image_path,
                    properties: overlay.image_properties,
                    layer: layer_id,
                    item: item_id.to_string(),
                    bounds: overlay.image_bounds,
                },
            )?;
            counts.overlays += 1;
        }
    }
    Ok(counts)
}

/// Import annotation layers for one item, committing each layer on its own.
///
/// A layer that fails is rolled back and reported; the others still land.
pub fn import_layers(conn: &mut Connection, item_id: &str, layers: Vec<AnnotationLayer>) -> ImportSummary {
    let mut summary = ImportSummary::default();
    for layer in layers {
        let name = layer.properties().name.clone();
        match store::in_transaction(conn, |tx| import_layer(tx, item_id, layer)) {
            Ok(counts) => {
                summary.layers += 1;
                summary.structures += counts.structures;
                summary.overlays += counts.overlays;
            }
            Err(e) => {
                tracing::error!("Layer {} failed to import: {}", name, e);
                summary.failed.push(FailedLayer {
                    layer: name,
                    error: e.to_string(),
                });
            }
        }
    }
    tracing::info!(
        "Imported {} layers ({} structures, {} overlays) into {}",
        summary.layers,
        summary.structures,
        summary.overlays,
        item_id
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use slidemap_atoms::items::{ItemFields, ItemSource};
    use slidemap_atoms::store::Table;
    use slidemap_atoms::{layers, Store};

    fn item(store: &Store) -> String {
        store
            .get_or_create(
                None,
                &ItemFields {
                    name: "slide".to_string(),
                    meta: json!({}),
                    image_meta: json!({}),
                    public: true,
                    owner: None,
                    session: None,
                    kind: ItemSource::LOCAL,
                },
            )
            .unwrap()
    }

    fn parse(v: Value) -> Vec<AnnotationLayer> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn imports_structures_and_overlays() {
        let store = Store::open_in_memory().unwrap();
        let item = item(&store);
        let layers = parse(json!([
            {
                "type": "FeatureCollection",
                "properties": {"name": "Glomeruli", "_id": "aaaaaaaaaaaaaaaaaaaaaaaa"},
                "features": [
                    {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1, 2]},
                     "properties": {"_id": "s1", "area": 4}},
                    {"type": "Feature", "geometry": {"type": "Point", "coordinates": []},
                     "properties": {}}
                ]
            },
            {
                "properties": {"name": "Heatmap"},
                "image_path": "/overlays/heat.png",
                "image_bounds": [100, 100, 0, 0]
            }
        ]));
        let summary = store.with_conn(|c| Ok(import_layers(c, &item, layers))).unwrap();
        assert_eq!(summary.layers, 2);
        assert_eq!(summary.structures, 1);
        assert_eq!(summary.overlays, 1);
        assert!(summary.failed.is_empty());

        let glom = store.with_conn(|c| layers::find_layer(c, &item, "Glomeruli")).unwrap();
        assert_eq!(glom.id, "aaaaaaaaaaaaaaaaaaaaaaaa");
        let s: slidemap_atoms::structures::Structure = store.with_conn(|c| store::get(c, "s1")).unwrap();
        assert_eq!(s.properties, json!({"area": 4}));
    }

    #[test]
    fn failing_layer_rolls_back_alone() {
        let store = Store::open_in_memory().unwrap();
        let item = item(&store);
        let layers = parse(json!([
            {"type": "FeatureCollection", "properties": {"name": "ok"},
             "features": [{"type": "Feature", "geometry": {"type": "Point", "coordinates": [0, 0]}, "properties": {}}]},
            {"type": "FeatureCollection", "properties": {"name": "broken"},
             "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [0, 0]}, "properties": {}},
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1, 1]}, "properties": {"_id": ""}}
             ]}
        ]));
        let summary = store.with_conn(|c| Ok(import_layers(c, &item, layers))).unwrap();
        assert_eq!(summary.layers, 1);
        assert_eq!(summary.structures, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].layer, "broken");
        assert_eq!(store.with_conn(|c| store::count(c, Table::Structure)).unwrap(), 1);
        assert_eq!(store.with_conn(|c| store::count(c, Table::Layer)).unwrap(), 1);
    }

    #[test]
    fn layer_id_owned_by_another_item_is_refused() {
        let store = Store::open_in_memory().unwrap();
        let first = item(&store);
        let second = item(&store);
        let glomeruli = |name: &str| {
            parse(json!([
                {"type": "FeatureCollection", "properties": {"name": name, "_id": "bbbbbbbbbbbbbbbbbbbbbbbb"},
                 "features": [{"type": "Feature", "geometry": {"type": "Point", "coordinates": [0, 0]}, "properties": {}}]}
            ]))
        };
        store.with_conn(|c| Ok(import_layers(c, &first, glomeruli("Glomeruli")))).unwrap();

        let summary = store.with_conn(|c| Ok(import_layers(c, &second, glomeruli("stolen")))).unwrap();
        assert_eq!(summary.layers, 0);
        assert_eq!(summary.failed.len(), 1);

        let kept = store.with_conn(|c| layers::layers_for_item(c, &first)).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "Glomeruli");
        assert!(store.with_conn(|c| layers::layers_for_item(c, &second)).unwrap().is_empty());
        assert_eq!(store.with_conn(|c| store::count(c, Table::Structure)).unwrap(), 1);
    }
}
