//! Response builders shared by every HTTP handler.

use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::Serialize;

use crate::error::Error as AtomError;

pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(value)?.into())
        .map_err(Box::new)?)
}

pub fn png(bytes: Vec<u8>) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "image/png")
        .header("Access-Control-Allow-Origin", "*")
        .body(Body::Binary(bytes))
        .map_err(Box::new)?)
}

pub fn no_content() -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .body(Body::Empty)
        .map_err(Box::new)?)
}

/// Body returned for unknown or hidden items.
pub fn invalid_image_id() -> Result<Response<Body>, Error> {
    json(StatusCode::BAD_REQUEST, &"invalid image id")
}

/// Convert a domain error into a 400 body.
pub fn error(err: &AtomError) -> Result<Response<Body>, Error> {
    match err {
        AtomError::NotFound { table: "item", id } => {
            tracing::warn!("Rejected request for item {}", id);
            invalid_image_id()
        }
        AtomError::Storage(_) | AtomError::Io(_) | AtomError::Worker(_) => {
            tracing::error!("{}", err);
            error_body(err)
        }
        _ => {
            tracing::warn!("{}", err);
            error_body(err)
        }
    }
}

fn error_body(err: &AtomError) -> Result<Response<Body>, Error> {
    json(
        StatusCode::BAD_REQUEST,
        &serde_json::json!({ "error": err.kind(), "message": err.to_string() }),
    )
}

pub fn not_found() -> Result<Response<Body>, Error> {
    json(StatusCode::NOT_FOUND, &serde_json::json!({ "error": "Not found" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_text(resp: &Response<Body>) -> String {
        match resp.body() {
            Body::Text(t) => t.clone(),
            Body::Binary(b) => String::from_utf8_lossy(b).into_owned(),
            Body::Empty => String::new(),
        }
    }

    #[test]
    fn unknown_item_is_invalid_image_id() {
        let resp = error(&AtomError::not_found("item", "nope")).unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(&resp), "\"invalid image id\"");
    }

    #[test]
    fn validation_errors_are_structured() {
        let resp = error(&AtomError::validation("unknown operator ~=")).unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_str(&body_text(&resp)).unwrap();
        assert_eq!(body["error"], "ValidationError");
        assert!(body["message"].as_str().unwrap().contains("~="));
    }
}
