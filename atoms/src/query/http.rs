use lambda_http::{http::StatusCode, Body, Error, Response};
use serde_json::Value;

use super::model::{Condition, Op, Operand, Scalar, Search};
use super::service;
use crate::error::Error as AtomError;
use crate::respond;
use crate::store::{Store, Table};

fn parse_table(table: &str) -> Result<Table, AtomError> {
    Table::parse(table).ok_or_else(|| AtomError::validation(format!("unknown table {}", table)))
}

fn parse_count(name: &str, value: Option<&str>) -> Result<Option<usize>, AtomError> {
    value
        .map(|v| {
            v.parse::<usize>()
                .map_err(|_| AtomError::validation(format!("{} must be a non-negative integer", name)))
        })
        .transpose()
}

fn build_search(
    table: &str,
    filters: Option<&str>,
    size: Option<&str>,
    offset: Option<&str>,
    requester: Option<&str>,
) -> Result<Search, AtomError> {
    let filters: Value = match filters {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| AtomError::validation(format!("filters are not valid JSON: {}", e)))?,
        None => Value::Null,
    };
    Ok(Search::new(parse_table(table)?)
        .with_filters(&filters)?
        .requested_by(requester)
        .page(parse_count("size", size)?, parse_count("offset", offset)?.unwrap_or(0)))
}

/// GET /db/{table}?filters=...&size=...&offset=...
pub async fn search_table(
    store: &Store,
    table: &str,
    filters: Option<&str>,
    size: Option<&str>,
    offset: Option<&str>,
    requester: Option<&str>,
) -> Result<Response<Body>, Error> {
    let search = match build_search(table, filters, size, offset, requester) {
        Ok(s) => s,
        Err(e) => return respond::error(&e),
    };
    match store.blocking(move |conn| service::search_records(conn, &search)).await {
        Ok(rows) => respond::json(StatusCode::OK, &rows),
        Err(e) => respond::error(&e),
    }
}

/// GET /db/{table}/{id}, subject to the same visibility rules as search.
pub async fn get_record(
    store: &Store,
    table: &str,
    id: &str,
    requester: Option<&str>,
) -> Result<Response<Body>, Error> {
    let table = match parse_table(table) {
        Ok(t) => t,
        Err(e) => return respond::error(&e),
    };
    let mut search = Search::new(table).requested_by(requester);
    search.conditions.push(Condition {
        table: table.name().to_string(),
        column: table.id_column().to_string(),
        op: Op::Eq,
        operand: Operand::Scalar(Scalar::Text(id.to_string())),
    });
    let id = id.to_string();

    let result = store
        .blocking(move |conn| {
            service::search_records(conn, &search)?
                .into_iter()
                .next()
                .ok_or_else(|| AtomError::not_found(table.name(), id))
        })
        .await;
    match result {
        Ok(row) => respond::json(StatusCode::OK, &row),
        Err(e) => respond::error(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{ItemFields, ItemSource};
    use serde_json::json;

    fn body_json(resp: &Response<Body>) -> Value {
        match resp.body() {
            Body::Text(t) => serde_json::from_str(t).unwrap(),
            other => panic!("unexpected body {:?}", other),
        }
    }

    fn seed() -> Store {
        let store = Store::open_in_memory().unwrap();
        for (id, public) in [("pub", true), ("priv", false)] {
            store
                .get_or_create(
                    Some(id),
                    &ItemFields {
                        name: id.to_string(),
                        meta: json!({}),
                        image_meta: json!({}),
                        public,
                        owner: None,
                        session: None,
                        kind: ItemSource::LOCAL,
                    },
                )
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn search_table_applies_filters() {
        let store = seed();
        let resp = search_table(&store, "item", Some(r#"{"item":{"name":{"in":["pub","priv"]}}}"#), None, None, None)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let rows = body_json(&resp);
        assert_eq!(rows.as_array().unwrap().len(), 1);
        assert_eq!(rows[0]["id"], "pub");
    }

    #[tokio::test]
    async fn malformed_filters_are_rejected_before_running() {
        let store = seed();
        let resp = search_table(&store, "item", Some(r#"{"item":{"name":{"<":"a"}}}"#), None, None, None)
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(&resp)["error"], "ValidationError");
    }

    #[tokio::test]
    async fn hidden_record_reads_as_invalid_image_id() {
        let store = seed();
        let resp = get_record(&store, "item", "priv", Some("nobody")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(&resp), json!("invalid image id"));

        let resp = get_record(&store, "item", "pub", None).await.unwrap();
        assert_eq!(body_json(&resp)["name"], "pub");
    }
}
