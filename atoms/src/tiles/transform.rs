//! Pixel space to viewer map space.
//!
//! The map CRS shrinks full-resolution pixels by `2^(levels-1)` and flips y.

use serde_json::Value;

use super::model::TileMetadata;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransform {
    pub x_scale: f64,
    pub y_scale: f64,
}

impl CoordinateTransform {
    pub fn from_metadata(meta: &TileMetadata) -> Self {
        let size_x = meta.size_x.max(1) as f64;
        let top_level_width = size_x / 2f64.powi(meta.levels.max(1) as i32 - 1);
        let x_scale = top_level_width / size_x;
        CoordinateTransform {
            x_scale,
            y_scale: -x_scale,
        }
    }

    pub fn to_map(&self, [x, y]: [f64; 2]) -> [f64; 2] {
        [x * self.x_scale, y * self.y_scale]
    }

    pub fn to_pixel(&self, [x, y]: [f64; 2]) -> [f64; 2] {
        [x / self.x_scale, y / self.y_scale]
    }

    /// Map-space box to a normalised pixel box `[min_x, min_y, max_x, max_y]`.
    pub fn bbox_to_pixel(&self, left: f64, top: f64, right: f64, bottom: f64) -> [f64; 4] {
        let [x0, y0] = self.to_pixel([left, top]);
        let [x1, y1] = self.to_pixel([right, bottom]);
        [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)]
    }

    pub fn geometry_to_map(&self, geom: &Value) -> Value {
        map_geometry(geom, &|p| self.to_map(p))
    }

    pub fn geometry_to_pixel(&self, geom: &Value) -> Value {
        map_geometry(geom, &|p| self.to_pixel(p))
    }
}

/// Apply `f` to every position of a GeoJSON geometry, leaving other members untouched.
pub fn map_geometry(geom: &Value, f: &dyn Fn([f64; 2]) -> [f64; 2]) -> Value {
    let mut out = geom.clone();
    if let Some(obj) = out.as_object_mut() {
        if let Some(coords) = obj.get_mut("coordinates") {
            *coords = map_coordinates(coords, f);
        }
        if let Some(Value::Array(children)) = obj.get_mut("geometries") {
            for child in children.iter_mut() {
                *child = map_geometry(child, f);
            }
        }
    }
    out
}

fn map_coordinates(value: &Value, f: &dyn Fn([f64; 2]) -> [f64; 2]) -> Value {
    let Some(array) = value.as_array() else {
        return value.clone();
    };
    match (array.first().and_then(Value::as_f64), array.get(1).and_then(Value::as_f64)) {
        (Some(x), Some(y)) => {
            let [mx, my] = f([x, y]);
            let mut position = vec![Value::from(mx), Value::from(my)];
            position.extend(array.iter().skip(2).cloned());
            Value::Array(position)
        }
        _ => Value::Array(array.iter().map(|v| map_coordinates(v, f)).collect()),
    }
}
