use std::sync::Arc;

use annotations_block as annotations;
use lambda_http::http::header::HeaderValue;
use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use slidemap_atoms as atoms;
use slidemap_shared::AppState;

fn with_cors_headers(mut resp: Response<Body>) -> Response<Body> {
    let headers = resp.headers_mut();
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET,POST,DELETE,OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type,X-User-Id"),
    );
    resp
}

fn query_param<'a>(event: &'a Request, key: &str) -> Option<&'a str> {
    event
        .query_string_parameters_ref()
        .and_then(|params| params.first(key))
}

fn finalize_response(resp: Result<Response<Body>, Error>) -> Result<Response<Body>, Error> {
    resp.map(with_cors_headers)
}

/// Main Lambda handler - routes slide, annotation and database requests
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    let body = event.body();
    let requester = event
        .headers()
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    let param = |key: &str| query_param(&event, key);
    tracing::info!("Slide API invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if method == Method::OPTIONS {
        let resp = Response::builder()
            .status(StatusCode::OK)
            .body(Body::Empty)
            .map_err(Box::new)?;
        return Ok(with_cors_headers(resp));
    }

    let store = &state.store;
    let tiles = &state.tiles;
    let config = &state.config;
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let resp = match (method, parts.as_slice()) {
        // --- ITEMS ---
        // POST /items - register a local or remote image
        (&Method::POST, ["items"]) => {
            atoms::items::create_item(store, config.tile_size, requester, body).await
        }

        // --- GENERIC SEARCH ---
        // GET /db/{table}?filters=&size=&offset=
        (&Method::GET, ["db", table]) => {
            atoms::query::search_table(
                store,
                table,
                param("filters"),
                param("size"),
                param("offset"),
                requester,
            )
            .await
        }
        // GET /db/{table}/{id}
        (&Method::GET, ["db", table, id]) => {
            atoms::query::get_record(store, table, id, requester).await
        }

        // --- TILES ---
        (&Method::GET, [id, "tiles", "metadata"]) => {
            atoms::tiles::get_tile_metadata(store, tiles, id, requester).await
        }
        (&Method::GET, [id, "tiles", "region"]) => {
            atoms::tiles::get_region(
                store,
                tiles,
                id,
                requester,
                [param("left"), param("top"), param("right"), param("bottom")],
                param("style"),
            )
            .await
        }
        (&Method::GET, [id, "tiles", "thumbnail"]) => {
            atoms::tiles::get_thumbnail(store, tiles, id, requester, config.thumbnail_size, param("style"))
                .await
        }
        (&Method::GET, [id, "tiles", z, x, y]) => {
            atoms::tiles::get_tile(store, tiles, id, requester, (*z, *x, *y), param("style")).await
        }

        // --- ANNOTATIONS ---
        (&Method::GET, [id, "annotations"]) => {
            annotations::get_annotations(
                store,
                id,
                requester,
                [param("top"), param("left"), param("bottom"), param("right")],
                param("crs"),
            )
            .await
        }
        (&Method::POST, [id, "annotations"]) => {
            annotations::post_annotations(store, id, requester, param("crs"), body).await
        }
        (&Method::GET, [id, "annotations", "metadata"]) => {
            annotations::get_annotation_metadata(store, id, requester).await
        }
        (&Method::GET, [id, "annotations", "data"]) => {
            annotations::get_property_table(
                store,
                id,
                requester,
                param("include_keys"),
                param("include_anns"),
                &config.properties,
            )
            .await
        }
        (&Method::GET, [id, "annotations", "data", "list"]) => {
            annotations::get_property_catalog(store, id, requester, &config.properties).await
        }

        // --- ACCESS ---
        (&Method::POST, [id, "access"]) => {
            atoms::access::grant_access(store, id, requester, body).await
        }
        (&Method::DELETE, [id, "access", user_id]) => {
            atoms::access::revoke_access(store, id, user_id, requester).await
        }

        // DELETE /{id} - remove an item and everything under it
        (&Method::DELETE, [id]) => atoms::items::delete_item(store, tiles, id, requester).await,

        _ => {
            tracing::warn!("No route matched - Method: {} Path: {}", method, path);
            atoms::respond::not_found()
        }
    };

    finalize_response(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use serde_json::{json, Value};
    use slidemap_shared::Config;
    use std::collections::HashMap;

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(Config::in_memory()).unwrap())
    }

    fn request(method: &str, uri: &str, user: Option<&str>, body: Body) -> Request {
        let mut builder = lambda_http::http::Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("X-User-Id", user);
        }
        builder.body(body).unwrap()
    }

    fn with_params(req: Request, params: &[(&str, &str)]) -> Request {
        let map: HashMap<String, String> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        req.with_query_string_parameters(map)
    }

    fn bytes(resp: &Response<Body>) -> Vec<u8> {
        match resp.body() {
            Body::Text(t) => t.as_bytes().to_vec(),
            Body::Binary(b) => b.clone(),
            Body::Empty => Vec::new(),
        }
    }

    fn body_json(resp: &Response<Body>) -> Value {
        serde_json::from_slice(&bytes(resp)).unwrap()
    }

    async fn register(state: &Arc<AppState>, dir: &tempfile::TempDir, public: bool) -> String {
        let path = dir.path().join("slide.png");
        GrayImage::from_pixel(512, 512, Luma([200])).save(&path).unwrap();
        let body = json!({"name": "slide", "kind": "local", "path": path, "public": public});
        let resp = function_handler(
            request("POST", "/items", Some("owner"), Body::Text(body.to_string())),
            state.clone(),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        body_json(&resp)["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn preflight_and_unknown_routes() {
        let state = state();
        let resp = function_handler(request("OPTIONS", "/anything", None, Body::Empty), state.clone())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["Access-Control-Allow-Origin"], "*");

        let resp = function_handler(request("PUT", "/a/b/c/d/e/f", None, Body::Empty), state)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(&resp), json!({"error": "Not found"}));
    }

    #[tokio::test]
    async fn unknown_item_is_invalid_image_id() {
        let state = state();
        for uri in ["/nope/tiles/0/0/0", "/nope/annotations", "/nope/annotations/data/list"] {
            let resp = function_handler(request("GET", uri, None, Body::Empty), state.clone())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body_json(&resp), json!("invalid image id"));
            assert_eq!(resp.headers()["Access-Control-Allow-Origin"], "*");
        }
    }

    #[tokio::test]
    async fn tiles_round_through_the_router() {
        let state = state();
        let dir = tempfile::TempDir::new().unwrap();
        let id = register(&state, &dir, true).await;

        let resp = function_handler(request("GET", &format!("/{}/tiles/1/0/0", id), None, Body::Empty), state.clone())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let tile = image::load_from_memory(&bytes(&resp)).unwrap().to_luma8();
        assert_eq!(tile.get_pixel(0, 0), &Luma([200]));

        let resp = function_handler(request("GET", &format!("/{}/tiles/9/-1/0", id), None, Body::Empty), state.clone())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let blank = image::load_from_memory(&bytes(&resp)).unwrap().to_luma8();
        assert_eq!(blank.dimensions(), (256, 256));
        assert!(blank.pixels().all(|p| p.0[0] == 0));

        let req = with_params(
            request("GET", &format!("/{}/tiles/region", id), None, Body::Empty),
            &[("left", "10"), ("top", "10"), ("right", "60"), ("bottom", "30")],
        );
        let resp = function_handler(req, state.clone()).await.unwrap();
        let region = image::load_from_memory(&bytes(&resp)).unwrap();
        assert_eq!((region.width(), region.height()), (50, 20));

        let resp = function_handler(request("GET", &format!("/{}/tiles/metadata", id), None, Body::Empty), state)
            .await
            .unwrap();
        assert_eq!(body_json(&resp)["levels"], 2);
    }

    #[tokio::test]
    async fn private_items_follow_grants() {
        let state = state();
        let dir = tempfile::TempDir::new().unwrap();
        let id = register(&state, &dir, false).await;

        let search = |user: Option<&'static str>| {
            let state = state.clone();
            async move {
                let resp = function_handler(request("GET", "/db/item", user, Body::Empty), state)
                    .await
                    .unwrap();
                body_json(&resp).as_array().unwrap().len()
            }
        };
        assert_eq!(search(None).await, 0);
        assert_eq!(search(Some("reader")).await, 0);

        let grant = json!({"user_id": "reader"}).to_string();
        let resp = function_handler(
            request("POST", &format!("/{}/access", id), Some("owner"), Body::Text(grant)),
            state.clone(),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(search(Some("reader")).await, 1);

        let resp = function_handler(
            request("DELETE", &format!("/{}/access/reader", id), Some("owner"), Body::Empty),
            state.clone(),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(search(Some("reader")).await, 0);
    }

    #[tokio::test]
    async fn annotation_import_and_export() {
        let state = state();
        let dir = tempfile::TempDir::new().unwrap();
        let id = register(&state, &dir, true).await;

        let layers = json!([{
            "type": "FeatureCollection",
            "properties": {"name": "Glomeruli"},
            "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [5, 5]}, "properties": {"area": 2}},
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [300, 300]}, "properties": {"area": 8}}
            ]
        }]);
        let resp = function_handler(
            request("POST", &format!("/{}/annotations", id), Some("owner"), Body::Text(layers.to_string())),
            state.clone(),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = with_params(
            request("GET", &format!("/{}/annotations", id), None, Body::Empty),
            &[("top", "0"), ("left", "0"), ("bottom", "100"), ("right", "100")],
        );
        let resp = function_handler(req, state.clone()).await.unwrap();
        assert_eq!(body_json(&resp)[0]["features"].as_array().unwrap().len(), 1);

        let resp = function_handler(
            request("GET", &format!("/{}/annotations/data/list", id), None, Body::Empty),
            state.clone(),
        )
        .await
        .unwrap();
        let catalog = body_json(&resp);
        let area = catalog
            .as_array()
            .unwrap()
            .iter()
            .find(|e| e["key"] == "area")
            .unwrap();
        assert_eq!((area["min"].as_f64(), area["max"].as_f64()), (Some(2.0), Some(8.0)));

        let req = with_params(
            request("GET", &format!("/{}/annotations/data", id), None, Body::Empty),
            &[("include_keys", "annotation.name,area"), ("include_anns", "all")],
        );
        let resp = function_handler(req, state.clone()).await.unwrap();
        assert_eq!(
            body_json(&resp),
            json!({"columns": ["annotation.name", "area"], "rows": [["Glomeruli", 2], ["Glomeruli", 8]]})
        );

        let resp = function_handler(request("DELETE", &format!("/{}", id), Some("owner"), Body::Empty), state.clone())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let resp = function_handler(request("GET", "/db/structure", None, Body::Empty), state)
            .await
            .unwrap();
        assert_eq!(body_json(&resp), json!([]));
    }

    #[tokio::test]
    async fn delete_route_is_owner_only() {
        let state = state();
        let dir = tempfile::TempDir::new().unwrap();
        let id = register(&state, &dir, true).await;

        let resp = function_handler(request("DELETE", &format!("/{}", id), Some("stranger"), Body::Empty), state.clone())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = function_handler(request("DELETE", &format!("/{}", id), Some("owner"), Body::Empty), state.clone())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = function_handler(request("GET", &format!("/{}/tiles/metadata", id), None, Body::Empty), state)
            .await
            .unwrap();
        assert_eq!(body_json(&resp), json!("invalid image id"));
    }
}
