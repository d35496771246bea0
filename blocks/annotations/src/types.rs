use serde::{Deserialize, Serialize};
use serde_json::Value;


// ========== LAYERS ==========
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LayerProperties {
    pub name: String,
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_type")]
    pub kind: String,
    pub geometry: Value,
    #[serde(default)]
    pub properties: Value,
}

fn feature_type() -> String {
    "Feature".to_string()
}

fn collection_type() -> String {
    "FeatureCollection".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FeatureCollection {
    #[serde(rename = "type", default = "collection_type")]
    pub kind: String,
    pub features: Vec<Feature>,
    pub properties: LayerProperties,
}

impl FeatureCollection {
    pub fn new(properties: LayerProperties, features: Vec<Feature>) -> Self {
        FeatureCollection {
            kind: collection_type(),
            features,
            properties,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OverlayLayer {
    pub properties: LayerProperties,
    pub image_path: String,
    /// `[min_x, min_y, max_x, max_y]`
    pub image_bounds: [f64; 4],
    #[serde(default)]
    pub image_properties: Value,
}

/// One entry of an annotation list: vector structures or a raster overlay.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum AnnotationLayer {
    Structures(FeatureCollection),
    Overlay(OverlayLayer),
}

impl AnnotationLayer {
    pub fn properties(&self) -> &LayerProperties {
        match self {
            AnnotationLayer::Structures(fc) => &fc.properties,
            AnnotationLayer::Overlay(o) => &o.properties,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LayerSummary {
    pub name: String,
    pub id: String,
}


// ========== IMPORT ==========
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct FailedLayer {
    pub layer: String,
    pub error: String,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct ImportSummary {
    pub layers: usize,
    pub structures: usize,
    pub overlays: usize,
    pub failed: Vec<FailedLayer>,
}


// ========== PROPERTY TABLE ==========
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PropertyTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}
