use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use serde_json::Value;

use super::model::{Condition, Operand, Scalar, Search, USER_TABLE};
use crate::access::AccessGrant;
use crate::error::{Error, Result};
use crate::items::{Item, LocalItem, RemoteItem};
use crate::layers::Layer;
use crate::overlays::ImageOverlay;
use crate::store::{self, Record, Table};
use crate::structures::Structure;

fn bind(scalar: &Scalar) -> SqlValue {
    match scalar {
        Scalar::Number(n) => SqlValue::Real(*n),
        Scalar::Text(s) => SqlValue::Text(s.clone()),
        Scalar::Bool(b) => SqlValue::Integer(*b as i64),
    }
}

fn condition_sql(table: &str, column: &str, c: &Condition, params: &mut Vec<SqlValue>) -> String {
    match &c.operand {
        Operand::Scalar(s) => {
            params.push(bind(s));
            format!("{}.{} {} ?{}", table, column, c.op.sql(), params.len())
        }
        Operand::List(list) => {
            let placeholders = list
                .iter()
                .map(|s| {
                    params.push(bind(s));
                    format!("?{}", params.len())
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}.{} {} ({})", table, column, c.op.sql(), placeholders)
        }
    }
}

/// Join predicate over a declared foreign key, in either direction.
fn join_condition(primary: Table, joined: Table) -> Result<String> {
    if let Some((column, _)) = primary.references().iter().find(|(_, t)| *t == joined) {
        return Ok(format!("{}.id = {}.{}", joined.name(), primary.name(), column));
    }
    if let Some((column, _)) = joined.references().iter().find(|(_, t)| *t == primary) {
        return Ok(format!(
            "{}.{} = {}.{}",
            joined.name(),
            column,
            primary.name(),
            primary.id_column()
        ));
    }
    Err(Error::validation(format!(
        "no foreign key joins {} and {}",
        primary.name(),
        joined.name()
    )))
}

/// Visibility of the row's item.
///
/// Public items are always visible. A `user` filter, or else an explicit
/// requester, additionally admits items granted to that user.
fn access_clause(search: &Search, params: &mut Vec<SqlValue>) -> Option<String> {
    let item_column = search.table.item_column()?;

    let user_conditions: Vec<&Condition> = search
        .conditions
        .iter()
        .filter(|c| c.table == USER_TABLE)
        .collect();
    let grant = if !user_conditions.is_empty() {
        Some(
            user_conditions
                .iter()
                .map(|c| condition_sql("user_access", "user_id", c, params))
                .collect::<Vec<_>>()
                .join(" AND "),
        )
    } else {
        search.requester.as_ref().map(|user| {
            params.push(SqlValue::Text(user.clone()));
            format!("user_access.user_id = ?{}", params.len())
        })
    };

    let visible = match grant {
        Some(grant) => format!(
            "(item.public = 1 OR EXISTS (SELECT 1 FROM user_access \
             WHERE user_access.item_id = item.id AND {}))",
            grant
        ),
        None => "item.public = 1".to_string(),
    };

    Some(if search.table == Table::Item {
        visible
    } else {
        format!(
            "EXISTS (SELECT 1 FROM item WHERE item.id = {}.{} AND {})",
            search.table.name(),
            item_column,
            visible
        )
    })
}

/// Compile filters, joins and the access policy into a WHERE clause.
pub fn where_clause(search: &Search) -> Result<(String, Vec<SqlValue>)> {
    let primary = search.table;
    let mut clauses = Vec::new();
    let mut params = Vec::new();

    for c in search.conditions.iter().filter(|c| c.table == primary.name()) {
        clauses.push(condition_sql(primary.name(), &c.column, c, &mut params));
    }

    for join in search.joins() {
        if join == USER_TABLE {
            continue;
        }
        let joined = Table::parse(join).ok_or_else(|| Error::validation(format!("unknown table {}", join)))?;
        let mut parts = vec![join_condition(primary, joined)?];
        for c in search.conditions.iter().filter(|c| c.table == join) {
            parts.push(condition_sql(join, &c.column, c, &mut params));
        }
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM {} WHERE {})",
            joined.name(),
            parts.join(" AND ")
        ));
    }

    if let Some(access) = access_clause(search, &mut params) {
        clauses.push(access);
    }

    let clause = if clauses.is_empty() {
        "1".to_string()
    } else {
        clauses.join(" AND ")
    };
    Ok((clause, params))
}

/// Run a search and read rows as `T`, paging after the full query runs.
pub fn search<T: Record>(conn: &Connection, search: &Search) -> Result<Vec<T>> {
    if T::TABLE != search.table {
        return Err(Error::validation(format!(
            "search on {} cannot return {} rows",
            search.table.name(),
            T::TABLE.name()
        )));
    }
    let (clause, params) = where_clause(search)?;
    let sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {}.rowid",
        T::COLUMNS,
        T::FROM,
        clause,
        T::TABLE.name()
    );
    tracing::debug!("search: {}", sql);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params), |row| T::from_row(row))?;
    store::paginate(rows, search.size, search.offset)
}

fn search_json<T: Record + Serialize>(conn: &Connection, s: &Search) -> Result<Vec<Value>> {
    search::<T>(conn, s)?
        .iter()
        .map(|r| Ok(serde_json::to_value(r)?))
        .collect()
}

/// Search any table, returning rows as JSON.
pub fn search_records(conn: &Connection, s: &Search) -> Result<Vec<Value>> {
    match s.table {
        Table::Item => search_json::<Item>(conn, s),
        Table::LocalItem => search_json::<LocalItem>(conn, s),
        Table::RemoteItem => search_json::<RemoteItem>(conn, s),
        Table::Layer => search_json::<Layer>(conn, s),
        Table::Structure => search_json::<Structure>(conn, s),
        Table::ImageOverlay => search_json::<ImageOverlay>(conn, s),
        Table::UserAccess => search_json::<AccessGrant>(conn, s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access;
    use crate::items::{ItemFields, ItemSource};
    use crate::layers::LayerFields;
    use crate::store::Store;
    use crate::structures::StructureFields;
    use serde_json::json;

    fn item(store: &Store, id: &str, public: bool) {
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

    fn ids(rows: Vec<Item>) -> Vec<String> {
        rows.into_iter().map(|i| i.id).collect()
    }

    fn run(store: &Store, s: Search) -> Vec<String> {
        ids(store.with_conn(|c| search::<Item>(c, &s)).unwrap())
    }

    #[test]
    fn private_items_need_a_grant_for_the_named_user() {
        let store = Store::open_in_memory().unwrap();
        item(&store, "open", true);
        item(&store, "closed", false);
        let by_user = |u: &str| {
            Search::new(Table::Item)
                .with_filters(&json!({"user": {"id": u}}))
                .unwrap()
        };

        assert_eq!(run(&store, by_user("u1")), vec!["open"]);
        store.with_conn(|c| access::grant(c, "u1", "closed")).unwrap();
        assert_eq!(run(&store, by_user("u1")), vec!["open", "closed"]);
        assert_eq!(run(&store, by_user("u2")), vec!["open"]);
    }

    #[test]
    fn default_policy_is_public_only() {
        let store = Store::open_in_memory().unwrap();
        item(&store, "open", true);
        item(&store, "closed", false);
        store.with_conn(|c| access::grant(c, "u1", "closed")).unwrap();
        assert_eq!(run(&store, Search::new(Table::Item)), vec!["open"]);
    }

    #[test]
    fn explicit_requester_sees_granted_items() {
        let store = Store::open_in_memory().unwrap();
        item(&store, "open", true);
        item(&store, "closed", false);
        store.with_conn(|c| access::grant(c, "u1", "closed")).unwrap();
        let s = Search::new(Table::Item).requested_by(Some("u1"));
        assert_eq!(run(&store, s), vec!["open", "closed"]);
    }

    #[test]
    fn join_filters_through_foreign_key() {
        let store = Store::open_in_memory().unwrap();
        item(&store, "a", true);
        item(&store, "b", true);
        for (layer, owner) in [("l1", "a"), ("l2", "b"), ("l3", "b")] {
            store
                .get_or_create(
                    Some(layer),
                    &LayerFields {
                        name: if layer == "l1" { "Glomeruli".into() } else { "Tubules".into() },
                        item: owner.to_string(),
                        meta: json!({}),
                    },
                )
                .unwrap();
        }

        let s = Search::new(Table::Item)
            .with_filters(&json!({"layer": {"name": "Tubules"}}))
            .unwrap();
        assert_eq!(run(&store, s), vec!["b"]);

        let s = Search::new(Table::Layer)
            .with_filters(&json!({"item": {"name": "b"}}))
            .unwrap();
        let layers = store.with_conn(|c| search::<Layer>(c, &s)).unwrap();
        assert_eq!(layers.len(), 2);
    }

    #[test]
    fn numeric_and_list_operators() {
        let store = Store::open_in_memory().unwrap();
        item(&store, "a", true);
        store
            .get_or_create(
                Some("l"),
                &LayerFields {
                    name: "Nuclei".into(),
                    item: "a".into(),
                    meta: json!({}),
                },
            )
            .unwrap();
        for (id, x) in [("s1", 0.0), ("s2", 50.0), ("s3", 100.0)] {
            store
                .get_or_create(
                    Some(id),
                    &StructureFields {
                        geom: json!({"type": "Point", "coordinates": [x, x]}),
                        properties: json!({}),
                        layer: "l".into(),
                        item: "a".into(),
                    },
                )
                .unwrap();
        }

        let s = Search::new(Table::Structure)
            .with_filters(&json!({"structure": {"min_x": {">=": 50}, "id": {"!in": ["s3"]}}}))
            .unwrap();
        let hits = store.with_conn(|c| search::<Structure>(c, &s)).unwrap();
        assert_eq!(hits.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(), vec!["s2"]);
    }

    #[test]
    fn structure_search_follows_item_visibility() {
        let store = Store::open_in_memory().unwrap();
        for (id, public) in [("open", true), ("closed", false)] {
            item(&store, id, public);
            let layer = format!("{}-layer", id);
            store
                .get_or_create(
                    Some(layer.as_str()),
                    &LayerFields {
                        name: "Glomeruli".into(),
                        item: id.to_string(),
                        meta: json!({}),
                    },
                )
                .unwrap();
            store
                .get_or_create(
                    Some(format!("{}-s", id).as_str()),
                    &StructureFields {
                        geom: json!({"type": "Point", "coordinates": [1, 1]}),
                        properties: json!({}),
                        layer,
                        item: id.to_string(),
                    },
                )
                .unwrap();
        }
        let found = |s: Search| {
            store
                .with_conn(|c| search::<Structure>(c, &s))
                .unwrap()
                .into_iter()
                .map(|s| s.id)
                .collect::<Vec<_>>()
        };

        assert_eq!(found(Search::new(Table::Structure)), vec!["open-s"]);
        assert_eq!(found(Search::new(Table::Structure).requested_by(Some("u1"))), vec!["open-s"]);

        store.with_conn(|c| access::grant(c, "u1", "closed")).unwrap();
        assert_eq!(
            found(Search::new(Table::Structure).requested_by(Some("u1"))),
            vec!["open-s", "closed-s"]
        );
        assert_eq!(found(Search::new(Table::Structure).requested_by(Some("u2"))), vec!["open-s"]);
    }

    #[test]
    fn pagination_applies_after_filtering() {
        let store = Store::open_in_memory().unwrap();
        for id in ["a", "b", "c", "d", "e"] {
            item(&store, id, id != "c");
        }
        let s = Search::new(Table::Item).page(Some(2), 1);
        assert_eq!(run(&store, s), vec!["b", "d"]);
    }

    #[test]
    fn records_serialize_for_any_table() {
        let store = Store::open_in_memory().unwrap();
        item(&store, "a", true);
        let rows = store
            .with_conn(|c| search_records(c, &Search::new(Table::Item)))
            .unwrap();
        assert_eq!(rows[0]["id"], "a");
        assert_eq!(rows[0]["kind"], "local");
    }

    #[test]
    fn mismatched_record_type_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .with_conn(|c| search::<Layer>(c, &Search::new(Table::Item)))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
