use std::path::Path;
use std::sync::Arc;

use lambda_http::{http::StatusCode, Body, Error, Response};

use super::cache::TileSourceCache;
use super::model::Style;
use super::source::{blank_tile, TileSource};
use crate::error::Error as AtomError;
use crate::items::{self, ItemSource};
use crate::respond;
use crate::store::{offload, Store};

/// Visible local item's tile source for `style`.
pub async fn resolve_source(
    store: &Store,
    cache: &TileSourceCache,
    item_id: &str,
    requester: Option<&str>,
    style: Option<&str>,
) -> Result<Arc<TileSource>, AtomError> {
    let style = style.map(Style::parse).transpose()?;
    let id = item_id.to_string();
    let requester = requester.map(str::to_string);
    let item = store
        .blocking(move |conn| items::load_visible(conn, &id, requester.as_deref()))
        .await?;

    let path = match item.source {
        ItemSource::Local { path } => path,
        ItemSource::Remote { url, .. } => {
            return Err(AtomError::validation(format!(
                "item {} is served remotely from {}",
                item.id, url
            )))
        }
    };
    let cache = cache.clone();
    offload(move || cache.get_or_open(&item.id, Path::new(&path), style)).await
}

fn parse_coord(name: &str, raw: &str) -> Result<i64, AtomError> {
    raw.parse()
        .map_err(|_| AtomError::validation(format!("{} must be an integer, got {}", name, raw)))
}

fn parse_bound(name: &str, raw: Option<&str>) -> Result<f64, AtomError> {
    raw.ok_or_else(|| AtomError::validation(format!("missing {}", name)))?
        .parse()
        .map_err(|_| AtomError::validation(format!("{} must be a number", name)))
}

/// Unreadable slide files still produce a picture.
fn blank_on_read_failure(cache: &TileSourceCache, err: AtomError) -> Result<Response<Body>, Error> {
    match err {
        AtomError::Io(_) | AtomError::Image(_) => {
            tracing::warn!("Serving blank tile after read failure: {}", err);
            match blank_tile(cache.tile_size(), cache.tile_size()) {
                Ok(png) => respond::png(png),
                Err(e) => respond::error(&e),
            }
        }
        other => respond::error(&other),
    }
}

/// GET /{id}/tiles/{z}/{x}/{y}
pub async fn get_tile(
    store: &Store,
    cache: &TileSourceCache,
    item_id: &str,
    requester: Option<&str>,
    (z, x, y): (&str, &str, &str),
    style: Option<&str>,
) -> Result<Response<Body>, Error> {
    let coords = parse_coord("z", z)
        .and_then(|z| Ok((z, parse_coord("x", x)?, parse_coord("y", y)?)));
    let (z, x, y) = match coords {
        Ok(c) => c,
        Err(e) => return respond::error(&e),
    };

    let source = match resolve_source(store, cache, item_id, requester, style).await {
        Ok(s) => s,
        Err(e) => return blank_on_read_failure(cache, e),
    };
    match offload(move || source.tile_or_blank(z, x, y)).await {
        Ok(png) => respond::png(png),
        Err(e) => respond::error(&e),
    }
}

/// GET /{id}/tiles/region?left=&top=&right=&bottom=
pub async fn get_region(
    store: &Store,
    cache: &TileSourceCache,
    item_id: &str,
    requester: Option<&str>,
    bounds: [Option<&str>; 4],
    style: Option<&str>,
) -> Result<Response<Body>, Error> {
    let [left, top, right, bottom] = bounds;
    let parsed = (|| {
        Ok::<_, AtomError>((
            parse_bound("left", left)?,
            parse_bound("top", top)?,
            parse_bound("right", right)?,
            parse_bound("bottom", bottom)?,
        ))
    })();
    let (left, top, right, bottom) = match parsed {
        Ok(b) => b,
        Err(e) => return respond::error(&e),
    };

    let source = match resolve_source(store, cache, item_id, requester, style).await {
        Ok(s) => s,
        Err(e) => return blank_on_read_failure(cache, e),
    };
    match offload(move || source.region(left, top, right, bottom)).await {
        Ok(png) => respond::png(png),
        Err(e) => respond::error(&e),
    }
}

/// GET /{id}/tiles/thumbnail
pub async fn get_thumbnail(
    store: &Store,
    cache: &TileSourceCache,
    item_id: &str,
    requester: Option<&str>,
    max_edge: u32,
    style: Option<&str>,
) -> Result<Response<Body>, Error> {
    let source = match resolve_source(store, cache, item_id, requester, style).await {
        Ok(s) => s,
        Err(e) => return respond::error(&e),
    };
    match offload(move || source.thumbnail(max_edge)).await {
        Ok(png) => respond::png(png),
        Err(e) => respond::error(&e),
    }
}

/// GET /{id}/tiles/metadata
pub async fn get_tile_metadata(
    store: &Store,
    cache: &TileSourceCache,
    item_id: &str,
    requester: Option<&str>,
) -> Result<Response<Body>, Error> {
    match resolve_source(store, cache, item_id, requester, None).await {
        Ok(source) => respond::json(StatusCode::OK, &source.metadata()),
        Err(e) => respond::error(&e),
    }
}
