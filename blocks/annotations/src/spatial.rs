//! GeoJSON to `geo` conversion and the intersection filters used by the
//! annotation endpoints.
//!
//! Geometry is parsed strictly first. A geometry that fails gets one repair
//! pass (non-finite vertices dropped, repeated vertices collapsed, open rings
//! closed, broken holes discarded) before it is given up on.

use geo::{coord, Coord, Geometry, GeometryCollection, Intersects, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon, Rect};
use serde_json::Value;
use slidemap_atoms::{Error, Result};

use crate::types::Feature;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Strict,
    Repair,
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidGeometry(msg.into())
}

fn parse_coord(value: &Value) -> Option<Coord<f64>> {
    let pair = value.as_array()?;
    let x = pair.first()?.as_f64()?;
    let y = pair.get(1)?.as_f64()?;
    (x.is_finite() && y.is_finite()).then_some(coord! { x: x, y: y })
}

fn parse_coords(value: &Value, mode: Mode) -> Result<Vec<Coord<f64>>> {
    let raw = value.as_array().ok_or_else(|| invalid("coordinates must be an array"))?;
    let mut out: Vec<Coord<f64>> = Vec::with_capacity(raw.len());
    for v in raw {
        match (parse_coord(v), mode) {
            (Some(c), Mode::Repair) if out.last() == Some(&c) => {}
            (Some(c), _) => out.push(c),
            (None, Mode::Repair) => {}
            (None, Mode::Strict) => return Err(invalid(format!("bad vertex {}", v))),
        }
    }
    Ok(out)
}

fn parse_line(value: &Value, mode: Mode) -> Result<LineString<f64>> {
    let coords = parse_coords(value, mode)?;
    if coords.len() < 2 {
        return Err(invalid("line needs at least two vertices"));
    }
    Ok(LineString::new(coords))
}

fn parse_ring(value: &Value, mode: Mode) -> Result<LineString<f64>> {
    let mut coords = parse_coords(value, mode)?;
    let closed = coords.len() > 1 && coords.first() == coords.last();
    if !closed {
        match (mode, coords.first().copied()) {
            (Mode::Repair, Some(first)) => coords.push(first),
            _ => return Err(invalid("ring is not closed")),
        }
    }
    if coords.len() < 4 {
        return Err(invalid("ring needs at least four vertices"));
    }
    Ok(LineString::new(coords))
}

fn parse_polygon(value: &Value, mode: Mode) -> Result<Polygon<f64>> {
    let rings = value.as_array().ok_or_else(|| invalid("polygon must be a list of rings"))?;
    let (exterior, holes) = rings.split_first().ok_or_else(|| invalid("polygon has no rings"))?;
    let exterior = parse_ring(exterior, mode)?;
    let mut interiors = Vec::with_capacity(holes.len());
    for hole in holes {
        match (parse_ring(hole, mode), mode) {
            (Ok(ring), _) => interiors.push(ring),
            (Err(_), Mode::Repair) => {}
            (Err(e), Mode::Strict) => return Err(e),
        }
    }
    Ok(Polygon::new(exterior, interiors))
}

fn each<T>(value: &Value, mode: Mode, f: fn(&Value, Mode) -> Result<T>) -> Result<Vec<T>> {
    value
        .as_array()
        .ok_or_else(|| invalid("coordinates must be an array"))?
        .iter()
        .map(|v| f(v, mode))
        .collect()
}

fn parse(geom: &Value, mode: Mode) -> Result<Geometry<f64>> {
    let kind = geom.get("type").and_then(Value::as_str).unwrap_or_default();
    if kind == "GeometryCollection" {
        let members = geom
            .get("geometries")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("collection has no geometries"))?;
        let parsed = members.iter().map(|g| parse(g, mode)).collect::<Result<Vec<_>>>()?;
        return Ok(Geometry::GeometryCollection(GeometryCollection::new_from(parsed)));
    }

    let coords = geom.get("coordinates").ok_or_else(|| invalid("geometry has no coordinates"))?;
    let point = |v: &Value, _: Mode| parse_coord(v).map(Point::from).ok_or_else(|| invalid("bad point"));
    Ok(match kind {
        "Point" => Geometry::Point(point(coords, mode)?),
        "MultiPoint" => Geometry::MultiPoint(MultiPoint::new(each(coords, mode, point)?)),
        "LineString" => Geometry::LineString(parse_line(coords, mode)?),
        "MultiLineString" => Geometry::MultiLineString(MultiLineString::new(each(coords, mode, parse_line)?)),
        "Polygon" => Geometry::Polygon(parse_polygon(coords, mode)?),
        "MultiPolygon" => Geometry::MultiPolygon(MultiPolygon::new(each(coords, mode, parse_polygon)?)),
        other => return Err(invalid(format!("unsupported geometry type {:?}", other))),
    })
}

/// Strict GeoJSON geometry conversion.
pub fn to_geometry(geom: &Value) -> Result<Geometry<f64>> {
    parse(geom, Mode::Strict)
}

/// Lenient conversion that fixes what it can.
pub fn repair(geom: &Value) -> Result<Geometry<f64>> {
    parse(geom, Mode::Repair)
}

/// Polygon covering `[min_x, min_y, max_x, max_y]`.
pub fn bbox_polygon([min_x, min_y, max_x, max_y]: [f64; 4]) -> Polygon<f64> {
    Rect::new(coord! { x: min_x, y: min_y }, coord! { x: max_x, y: max_y }).to_polygon()
}

/// Whether `geom` touches `query`. Unrepairable geometry never does.
pub fn geometry_intersects(geom: &Value, query: &Polygon<f64>) -> bool {
    let geometry = match to_geometry(geom) {
        Ok(g) => g,
        Err(first) => match repair(geom) {
            Ok(g) => {
                tracing::debug!("Repaired geometry: {}", first);
                g
            }
            Err(e) => {
                tracing::warn!("Dropping feature with invalid geometry: {}", e);
                return false;
            }
        },
    };
    geometry.intersects(query)
}

/// Keep the features that intersect `query`, geometry untouched.
pub fn filter_features(features: Vec<Feature>, query: &Polygon<f64>) -> Vec<Feature> {
    features
        .into_iter()
        .filter(|f| geometry_intersects(&f.geometry, query))
        .collect()
}

/// Box test used for raster overlays.
pub fn bounds_intersect(bounds: [f64; 4], bbox: [f64; 4]) -> bool {
    let rect = |[a, b, c, d]: [f64; 4]| Rect::new(coord! { x: a, y: b }, coord! { x: c, y: d });
    rect(bounds).intersects(&rect(bbox))
}
