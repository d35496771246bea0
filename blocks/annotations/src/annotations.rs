use futures::future::try_join_all;
use lambda_http::{http::StatusCode, Body, Error, Response};
use serde_json::Value;
use slidemap_atoms::error::Error as AtomError;
use slidemap_atoms::items::Item;
use slidemap_atoms::layers::Layer;
use slidemap_atoms::overlays::ImageOverlay;
use slidemap_atoms::store::offload;
use slidemap_atoms::structures::Structure;
use slidemap_atoms::tiles::{CoordinateTransform, TileMetadata};
use slidemap_atoms::{items, layers, overlays, respond, structures, Store};

use crate::import::import_layers;
use crate::spatial::{bbox_polygon, bounds_intersect, filter_features};
use crate::types::{AnnotationLayer, Feature, FeatureCollection, LayerProperties, LayerSummary, OverlayLayer};

/// Coordinate system of geometry crossing the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Crs {
    Pixel,
    Map,
}

impl Crs {
    pub fn parse(raw: Option<&str>) -> Result<Self, AtomError> {
        match raw {
            None | Some("pixel") => Ok(Crs::Pixel),
            Some("map") => Ok(Crs::Map),
            Some(other) => Err(AtomError::validation(format!("unknown crs {}", other))),
        }
    }
}

/// `top,left,bottom,right` query bounds. Any missing bound means no box.
pub fn parse_bounds(
    top: Option<&str>,
    left: Option<&str>,
    bottom: Option<&str>,
    right: Option<&str>,
) -> Result<Option<[f64; 4]>, AtomError> {
    let (Some(top), Some(left), Some(bottom), Some(right)) = (top, left, bottom, right) else {
        return Ok(None);
    };
    let num = |name: &str, raw: &str| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| AtomError::validation(format!("{} must be a number, got {}", name, raw)))
    };
    let (left, top, right, bottom) = (num("left", left)?, num("top", top)?, num("right", right)?, num("bottom", bottom)?);
    Ok(Some([left.min(right), top.min(bottom), left.max(right), top.max(bottom)]))
}

fn transform_for(item: &Item) -> Result<CoordinateTransform, AtomError> {
    let meta: TileMetadata = serde_json::from_value(item.image_meta.clone())
        .map_err(|_| AtomError::validation(format!("item {} has no pyramid metadata", item.id)))?;
    Ok(CoordinateTransform::from_metadata(&meta))
}

fn map_bounds(t: &CoordinateTransform, [a, b, c, d]: [f64; 4], f: fn(&CoordinateTransform, [f64; 2]) -> [f64; 2]) -> [f64; 4] {
    let [x0, y0] = f(t, [a, b]);
    let [x1, y1] = f(t, [c, d]);
    [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)]
}

struct LayerRows {
    layer: Layer,
    structures: Vec<Structure>,
    overlays: Vec<ImageOverlay>,
}

fn load_rows(conn: &rusqlite::Connection, item_id: &str, bbox: Option<[f64; 4]>) -> slidemap_atoms::Result<Vec<LayerRows>> {
    let mut all = structures::structures_overlapping(conn, item_id, None, bbox)?;
    layers::layers_for_item(conn, item_id)?
        .into_iter()
        .map(|layer| {
            let (mine, rest): (Vec<_>, Vec<_>) = all.drain(..).partition(|s| s.layer == layer.id);
            all = rest;
            let overlays = overlays::overlays_for_layer(conn, &layer.id)?;
            Ok(LayerRows {
                layer,
                structures: mine,
                overlays,
            })
        })
        .collect()
}

/// Exact filtering and output shaping for one layer.
fn render_layer(rows: LayerRows, bbox: Option<[f64; 4]>, transform: Option<CoordinateTransform>) -> Vec<AnnotationLayer> {
    let properties = LayerProperties {
        name: rows.layer.name.clone(),
        id: Some(rows.layer.id.clone()),
    };

    if !rows.overlays.is_empty() {
        return rows
            .overlays
            .into_iter()
            .filter(|o| bbox.map_or(true, |b| bounds_intersect(o.bounds, b)))
            .map(|o| {
                let bounds = match transform {
                    Some(t) => map_bounds(&t, o.bounds, CoordinateTransform::to_map),
                    None => o.bounds,
                };
                AnnotationLayer::Overlay(OverlayLayer {
                    properties: properties.clone(),
                    image_path: o.image_src,
                    image_bounds: bounds,
                    image_properties: o.properties,
                })
            })
            .collect();
    }

    let features: Vec<Feature> = rows
        .structures
        .into_iter()
        .map(|s| {
            let mut props = match s.properties {
                Value::Object(map) => map,
                _ => Default::default(),
            };
            props.insert("_id".to_string(), Value::String(s.id));
            Feature {
                kind: "Feature".to_string(),
                geometry: s.geom,
                properties: Value::Object(props),
            }
        })
        .collect();
    let mut features = match bbox {
        Some(b) => filter_features(features, &bbox_polygon(b)),
        None => features,
    };
    if let Some(t) = transform {
        for f in &mut features {
            f.geometry = t.geometry_to_map(&f.geometry);
        }
    }
    vec![AnnotationLayer::Structures(FeatureCollection::new(properties, features))]
}

/// GET /{id}/annotations[?top=&left=&bottom=&right=][&crs=map]
pub async fn get_annotations(
    store: &Store,
    item_id: &str,
    requester: Option<&str>,
    bounds: [Option<&str>; 4],
    crs: Option<&str>,
) -> Result<Response<Body>, Error> {
    let [top, left, bottom, right] = bounds;
    let parsed = Crs::parse(crs).and_then(|crs| Ok((crs, parse_bounds(top, left, bottom, right)?)));
    let (crs, bbox) = match parsed {
        Ok(p) => p,
        Err(e) => return respond::error(&e),
    };

    let id = item_id.to_string();
    let requester = requester.map(str::to_string);
    let loaded = store
        .blocking(move |conn| {
            let item = items::load_visible(conn, &id, requester.as_deref())?;
            let transform = match crs {
                Crs::Map => Some(transform_for(&item)?),
                Crs::Pixel => None,
            };
            let bbox = match (bbox, transform) {
                (Some([l, t, r, b]), Some(tf)) => Some(tf.bbox_to_pixel(l, t, r, b)),
                (bbox, _) => bbox,
            };
            Ok((load_rows(conn, &item.id, bbox)?, bbox, transform))
        })
        .await;
    let (rows, bbox, transform) = match loaded {
        Ok(l) => l,
        Err(e) => return respond::error(&e),
    };

    let rendered = try_join_all(
        rows.into_iter()
            .map(|layer_rows| offload(move || Ok(render_layer(layer_rows, bbox, transform)))),
    )
    .await;

    match rendered {
        Ok(layers) => {
            let layers: Vec<AnnotationLayer> = layers.into_iter().flatten().collect();
            tracing::info!("Serving {} annotation layers for {}", layers.len(), item_id);
            respond::json(StatusCode::OK, &layers)
        }
        Err(e) => respond::error(&e),
    }
}

/// GET /{id}/annotations/metadata
pub async fn get_annotation_metadata(
    store: &Store,
    item_id: &str,
    requester: Option<&str>,
) -> Result<Response<Body>, Error> {
    let id = item_id.to_string();
    let requester = requester.map(str::to_string);
    let result = store
        .blocking(move |conn| {
            let item = items::load_visible(conn, &id, requester.as_deref())?;
            layers::layers_for_item(conn, &item.id)
        })
        .await;

    match result {
        Ok(layers) => {
            let summary: Vec<LayerSummary> = layers
                .into_iter()
                .map(|l| LayerSummary { name: l.name, id: l.id })
                .collect();
            respond::json(StatusCode::OK, &summary)
        }
        Err(e) => respond::error(&e),
    }
}

fn to_pixel_space(layers: &mut [AnnotationLayer], t: &CoordinateTransform) {
    for layer in layers {
        match layer {
            AnnotationLayer::Structures(fc) => {
                for f in &mut fc.features {
                    f.geometry = t.geometry_to_pixel(&f.geometry);
                }
            }
            AnnotationLayer::Overlay(o) => {
                o.image_bounds = map_bounds(t, o.image_bounds, CoordinateTransform::to_pixel);
            }
        }
    }
}

/// POST /{id}/annotations
pub async fn post_annotations(
    store: &Store,
    item_id: &str,
    requester: Option<&str>,
    crs: Option<&str>,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let parsed = Crs::parse(crs).and_then(|crs| {
        let layers: Vec<AnnotationLayer> = serde_json::from_slice(body)
            .map_err(|e| AtomError::validation(format!("invalid annotation body: {}", e)))?;
        Ok((crs, layers))
    });
    let (crs, mut layers) = match parsed {
        Ok(p) => p,
        Err(e) => return respond::error(&e),
    };
    tracing::info!("post_annotations: item={} layers={}", item_id, layers.len());

    let id = item_id.to_string();
    let requester = requester.map(str::to_string);
    let result = store
        .blocking(move |conn| {
            let item = items::load_visible(conn, &id, requester.as_deref())?;
            if item.owner.is_some() && item.owner.as_deref() != requester.as_deref() {
                return Err(AtomError::validation("only the owner can add annotations"));
            }
            if crs == Crs::Map {
                to_pixel_space(&mut layers, &transform_for(&item)?);
            }
            Ok(import_layers(conn, &item.id, layers))
        })
        .await;

    match result {
        Ok(summary) => respond::json(StatusCode::CREATED, &summary),
        Err(e) => respond::error(&e),
    }
}
