//! Property catalog for an item's structures.
//!
//! Every structure's property bag is flattened into `(path, leaf)` pairs up
//! to a fixed depth. The indexer folds those pairs into one entry per path:
//! occurrence count, numeric range, and the set of distinct string values.
//! Entries only ever grow.

use std::collections::{BTreeSet, HashMap};

use lambda_http::{http::StatusCode, Body, Error, Response};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use slidemap_atoms::{items, layers, overlays, respond, structures, Store};

pub const ANNOTATION_NAME: &str = "annotation.name";
pub const ANNOTATION_ID: &str = "annotation.id";

#[derive(Debug, Clone)]
pub struct PropertyConfig {
    pub depth: usize,
    pub separator: String,
}

impl Default for PropertyConfig {
    fn default() -> Self {
        PropertyConfig {
            depth: 4,
            separator: " --> ".to_string(),
        }
    }
}

/// Visit every scalar leaf of `value` whose path is at most `depth` long.
///
/// Array elements are addressed by index. Nulls are skipped.
pub fn visit_leaves<'a>(value: &'a Value, depth: usize, f: &mut dyn FnMut(&[String], &'a Value)) {
    fn walk<'a>(value: &'a Value, path: &mut Vec<String>, depth: usize, f: &mut dyn FnMut(&[String], &'a Value)) {
        match value {
            Value::Null => {}
            Value::Object(map) if path.len() < depth => {
                for (k, v) in map {
                    path.push(k.clone());
                    walk(v, path, depth, f);
                    path.pop();
                }
            }
            Value::Array(items) if path.len() < depth => {
                for (i, v) in items.iter().enumerate() {
                    path.push(i.to_string());
                    walk(v, path, depth, f);
                    path.pop();
                }
            }
            Value::Object(_) | Value::Array(_) => {}
            leaf if !path.is_empty() => f(path, leaf),
            _ => {}
        }
    }
    walk(value, &mut Vec::new(), depth, f);
}

/// Flattened `(key, leaf)` pairs of a property bag.
pub fn flatten_properties<'a>(value: &'a Value, config: &PropertyConfig) -> Vec<(String, &'a Value)> {
    let mut out = Vec::new();
    visit_leaves(value, config.depth, &mut |path, leaf| {
        out.push((path.join(&config.separator), leaf));
    });
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    Numeric,
    String,
    Mixed,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PropertyEntry {
    pub key: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: PropertyKind,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distinct: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distinctcount: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl PropertyEntry {
    fn new(key: String, title: String, kind: PropertyKind) -> Self {
        PropertyEntry {
            key,
            title,
            kind,
            count: 0,
            distinct: None,
            distinctcount: None,
            min: None,
            max: None,
        }
    }

    fn observe_number(&mut self, n: f64) {
        self.count += 1;
        if self.kind == PropertyKind::String {
            self.kind = PropertyKind::Mixed;
        }
        self.min = Some(self.min.map_or(n, |m| m.min(n)));
        self.max = Some(self.max.map_or(n, |m| m.max(n)));
    }

    fn observe_string(&mut self, s: &str) {
        self.count += 1;
        if self.kind == PropertyKind::Numeric {
            self.kind = PropertyKind::Mixed;
        }
        let distinct = self.distinct.get_or_insert_with(BTreeSet::new);
        if !distinct.contains(s) {
            distinct.insert(s.to_string());
        }
        self.distinctcount = Some(distinct.len());
    }
}

/// Running catalog of property keys.
#[derive(Debug, Clone, Default)]
pub struct PropertyIndexer {
    config: PropertyConfig,
    entries: Vec<PropertyEntry>,
    positions: HashMap<String, usize>,
}

impl PropertyIndexer {
    pub fn new(config: PropertyConfig) -> Self {
        PropertyIndexer {
            config,
            ..Default::default()
        }
    }

    fn entry(&mut self, key: &str, title: impl FnOnce() -> String, kind: PropertyKind) -> &mut PropertyEntry {
        let idx = match self.positions.get(key) {
            Some(&idx) => idx,
            None => {
                self.entries.push(PropertyEntry::new(key.to_string(), title(), kind));
                self.positions.insert(key.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx]
    }

    fn observe(&mut self, key: &str, title: impl FnOnce() -> String, leaf: &Value) {
        match leaf {
            Value::Number(n) => {
                if let Some(n) = n.as_f64() {
                    self.entry(key, title, PropertyKind::Numeric).observe_number(n);
                }
            }
            Value::String(s) => self.entry(key, title, PropertyKind::String).observe_string(s),
            Value::Bool(b) => self
                .entry(key, title, PropertyKind::String)
                .observe_string(if *b { "true" } else { "false" }),
            _ => {}
        }
    }

    /// Record the synthetic annotation keys for one layer.
    pub fn record_layer(&mut self, name: &str, id: &str) {
        self.observe(ANNOTATION_NAME, || "Annotation Name".to_string(), &Value::String(name.to_string()));
        self.observe(ANNOTATION_ID, || "Annotation ID".to_string(), &Value::String(id.to_string()));
    }

    /// Fold one structure's property bag into the catalog.
    pub fn record_properties(&mut self, properties: &Value) {
        let mut leaves: Vec<(Vec<String>, Value)> = Vec::new();
        visit_leaves(properties, self.config.depth, &mut |path, leaf| {
            leaves.push((path.to_vec(), leaf.clone()));
        });
        for (path, leaf) in leaves {
            let key = path.join(&self.config.separator);
            let title = || path.last().cloned().unwrap_or_default();
            self.observe(&key, title, &leaf);
        }
    }

    pub fn get(&self, key: &str) -> Option<&PropertyEntry> {
        self.positions.get(key).map(|&i| &self.entries[i])
    }

    pub fn catalog(&self) -> &[PropertyEntry] {
        &self.entries
    }

    pub fn into_catalog(self) -> Vec<PropertyEntry> {
        self.entries
    }
}

/// Catalog every layer, structure and overlay of one item.
pub fn index_item(conn: &Connection, item_id: &str, config: &PropertyConfig) -> slidemap_atoms::Result<Vec<PropertyEntry>> {
    let mut indexer = PropertyIndexer::new(config.clone());
    let mut by_layer: HashMap<String, Vec<Value>> = HashMap::new();
    for s in structures::structures_overlapping(conn, item_id, None, None)? {
        by_layer.entry(s.layer).or_default().push(s.properties);
    }

    for layer in layers::layers_for_item(conn, item_id)? {
        indexer.record_layer(&layer.name, &layer.id);
        for props in by_layer.remove(&layer.id).unwrap_or_default() {
            indexer.record_properties(&props);
        }
        for overlay in overlays::overlays_for_layer(conn, &layer.id)? {
            indexer.record_properties(&overlay.properties);
        }
    }
    Ok(indexer.into_catalog())
}

/// GET /{id}/annotations/data/list
pub async fn get_property_catalog(
    store: &Store,
    item_id: &str,
    requester: Option<&str>,
    config: &PropertyConfig,
) -> Result<Response<Body>, Error> {
    let id = item_id.to_string();
    let requester = requester.map(str::to_string);
    let config = config.clone();

    let result = store
        .blocking(move |conn| {
            let item = items::load_visible(conn, &id, requester.as_deref())?;
            index_item(conn, &item.id, &config)
        })
        .await;

    match result {
        Ok(catalog) => {
            tracing::info!("Property catalog for {}: {} keys", item_id, catalog.len());
            respond::json(StatusCode::OK, &catalog)
        }
        Err(e) => respond::error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_keys_use_separator_and_stop_at_depth() {
        let props = json!({
            "area": 12.5,
            "Main_Cell_Types": {"POD": 0.3, "EC": {"deep": {"deeper": {"deepest": 1}}}},
            "tags": ["a", "b"],
            "missing": null
        });
        let keys: Vec<String> = flatten_properties(&props, &PropertyConfig::default())
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert!(keys.contains(&"area".to_string()));
        assert!(keys.contains(&"Main_Cell_Types --> POD".to_string()));
        assert!(keys.contains(&"tags --> 1".to_string()));
        assert!(!keys.iter().any(|k| k.ends_with("deepest")));
        assert!(!keys.iter().any(|k| k == "missing"));
    }

    #[test]
    fn entries_accumulate_monotonically() {
        let mut indexer = PropertyIndexer::default();
        let mut last_max = f64::MIN;
        let mut last_distinct = 0;
        for (area, label) in [(5.0, "a"), (2.0, "b"), (9.0, "a"), (1.0, "c")] {
            indexer.record_properties(&json!({"area": area, "label": label}));
            let max = indexer.get("area").and_then(|e| e.max).unwrap();
            let distinct = indexer.get("label").and_then(|e| e.distinctcount).unwrap();
            assert!(max >= last_max);
            assert!(distinct >= last_distinct);
            last_max = max;
            last_distinct = distinct;
        }
        let area = indexer.get("area").unwrap();
        assert_eq!((area.min, area.max, area.count), (Some(1.0), Some(9.0), 4));
        assert_eq!(indexer.get("label").unwrap().distinctcount, Some(3));
    }

    #[test]
    fn synthetic_keys_count_layers_not_features() {
        let mut indexer = PropertyIndexer::default();
        indexer.record_layer("Glomeruli", "l1");
        for _ in 0..3 {
            indexer.record_properties(&json!({"area": 1}));
        }
        indexer.record_layer("Tubules", "l2");

        let names = indexer.get(ANNOTATION_NAME).unwrap();
        assert_eq!(names.count, 2);
        assert_eq!(names.distinctcount, Some(2));
        assert_eq!(indexer.get(ANNOTATION_ID).unwrap().count, 2);
        assert_eq!(indexer.catalog()[0].key, ANNOTATION_NAME);
    }

    #[test]
    fn mixed_types_keep_both_summaries() {
        let mut indexer = PropertyIndexer::default();
        indexer.record_properties(&json!({"grade": 2}));
        indexer.record_properties(&json!({"grade": "high"}));
        let grade = indexer.get("grade").unwrap();
        assert_eq!(grade.kind, PropertyKind::Mixed);
        assert_eq!(grade.max, Some(2.0));
        assert_eq!(grade.distinctcount, Some(1));
    }

    #[test]
    fn catalog_serializes_with_type_field() {
        let mut indexer = PropertyIndexer::default();
        indexer.record_properties(&json!({"area": 3}));
        let json = serde_json::to_value(indexer.catalog()).unwrap();
        assert_eq!(json[0]["type"], "numeric");
        assert_eq!(json[0]["title"], "area");
        assert!(json[0].get("distinct").is_none());
    }
}
