//! Relational layout of the annotation store.

pub(crate) const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;

    CREATE TABLE IF NOT EXISTS item (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        meta TEXT NOT NULL DEFAULT '{}',
        image_meta TEXT NOT NULL DEFAULT '{}',
        public INTEGER NOT NULL DEFAULT 0,
        owner TEXT,
        session TEXT,
        kind TEXT NOT NULL,
        updated TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS local_item (
        item_id TEXT PRIMARY KEY,
        path TEXT NOT NULL,
        updated TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS remote_item (
        item_id TEXT PRIMARY KEY,
        remote_id TEXT NOT NULL,
        url TEXT NOT NULL,
        updated TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS layer (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        item TEXT NOT NULL,
        meta TEXT NOT NULL DEFAULT '{}',
        updated TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS structure (
        id TEXT PRIMARY KEY,
        geom TEXT NOT NULL,
        properties TEXT NOT NULL DEFAULT '{}',
        layer TEXT NOT NULL,
        item TEXT NOT NULL,
        min_x REAL NOT NULL,
        min_y REAL NOT NULL,
        max_x REAL NOT NULL,
        max_y REAL NOT NULL,
        updated TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS image_overlay (
        id TEXT PRIMARY KEY,
        image_src TEXT NOT NULL,
        properties TEXT NOT NULL DEFAULT '{}',
        layer TEXT NOT NULL,
        item TEXT NOT NULL,
        min_x REAL NOT NULL,
        min_y REAL NOT NULL,
        max_x REAL NOT NULL,
        max_y REAL NOT NULL,
        updated TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS user_access (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        item_id TEXT NOT NULL,
        meta TEXT NOT NULL DEFAULT '{}',
        updated TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_item_public ON item(public);
    CREATE INDEX IF NOT EXISTS idx_layer_item ON layer(item);
    CREATE INDEX IF NOT EXISTS idx_structure_layer ON structure(layer);
    CREATE INDEX IF NOT EXISTS idx_structure_item ON structure(item);
    CREATE INDEX IF NOT EXISTS idx_overlay_layer ON image_overlay(layer);
    CREATE INDEX IF NOT EXISTS idx_overlay_item ON image_overlay(item);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_access_pair ON user_access(user_id, item_id);
    CREATE INDEX IF NOT EXISTS idx_access_item ON user_access(item_id);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Item,
    LocalItem,
    RemoteItem,
    Layer,
    Structure,
    ImageOverlay,
    UserAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Number,
    Bool,
    /// JSON blobs are stored as text and never filtered on directly.
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn col(name: &'static str, kind: ColumnKind) -> Column {
    Column { name, kind }
}

use ColumnKind::{Bool, Json, Number, Text};

const ITEM_COLUMNS: &[Column] = &[
    col("id", Text),
    col("name", Text),
    col("meta", Json),
    col("image_meta", Json),
    col("public", Bool),
    col("owner", Text),
    col("session", Text),
    col("kind", Text),
    col("updated", Text),
];

const LOCAL_ITEM_COLUMNS: &[Column] = &[col("item_id", Text), col("path", Text), col("updated", Text)];

const REMOTE_ITEM_COLUMNS: &[Column] = &[
    col("item_id", Text),
    col("remote_id", Text),
    col("url", Text),
    col("updated", Text),
];

const LAYER_COLUMNS: &[Column] = &[
    col("id", Text),
    col("name", Text),
    col("item", Text),
    col("meta", Json),
    col("updated", Text),
];

const STRUCTURE_COLUMNS: &[Column] = &[
    col("id", Text),
    col("geom", Json),
    col("properties", Json),
    col("layer", Text),
    col("item", Text),
    col("min_x", Number),
    col("min_y", Number),
    col("max_x", Number),
    col("max_y", Number),
    col("updated", Text),
];

const OVERLAY_COLUMNS: &[Column] = &[
    col("id", Text),
    col("image_src", Text),
    col("properties", Json),
    col("layer", Text),
    col("item", Text),
    col("min_x", Number),
    col("min_y", Number),
    col("max_x", Number),
    col("max_y", Number),
    col("updated", Text),
];

const ACCESS_COLUMNS: &[Column] = &[
    col("id", Text),
    col("user_id", Text),
    col("item_id", Text),
    col("meta", Json),
    col("updated", Text),
];

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Item,
        Table::LocalItem,
        Table::RemoteItem,
        Table::Layer,
        Table::Structure,
        Table::ImageOverlay,
        Table::UserAccess,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Item => "item",
            Table::LocalItem => "local_item",
            Table::RemoteItem => "remote_item",
            Table::Layer => "layer",
            Table::Structure => "structure",
            Table::ImageOverlay => "image_overlay",
            Table::UserAccess => "user_access",
        }
    }

    pub fn parse(name: &str) -> Option<Table> {
        Table::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Primary key column. Item sub-rows are keyed by their item.
    pub fn id_column(self) -> &'static str {
        match self {
            Table::LocalItem | Table::RemoteItem => "item_id",
            _ => "id",
        }
    }

    pub fn columns(self) -> &'static [Column] {
        match self {
            Table::Item => ITEM_COLUMNS,
            Table::LocalItem => LOCAL_ITEM_COLUMNS,
            Table::RemoteItem => REMOTE_ITEM_COLUMNS,
            Table::Layer => LAYER_COLUMNS,
            Table::Structure => STRUCTURE_COLUMNS,
            Table::ImageOverlay => OVERLAY_COLUMNS,
            Table::UserAccess => ACCESS_COLUMNS,
        }
    }

    pub fn column(self, name: &str) -> Option<Column> {
        self.columns().iter().copied().find(|c| c.name == name)
    }

    /// Declared foreign keys as (column, referenced table). References always target `id`.
    pub fn references(self) -> &'static [(&'static str, Table)] {
        match self {
            Table::Item => &[],
            Table::LocalItem | Table::RemoteItem | Table::UserAccess => &[("item_id", Table::Item)],
            Table::Layer => &[("item", Table::Item)],
            Table::Structure | Table::ImageOverlay => {
                &[("layer", Table::Layer), ("item", Table::Item)]
            }
        }
    }

    /// Column holding the owning item, if the table has one.
    pub fn item_column(self) -> Option<&'static str> {
        match self {
            Table::Item => Some("id"),
            _ => self
                .references()
                .iter()
                .find(|(_, t)| *t == Table::Item)
                .map(|(c, _)| *c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_parse_back() {
        for table in Table::ALL {
            assert_eq!(Table::parse(table.name()), Some(table));
        }
        assert_eq!(Table::parse("user"), None);
    }

    #[test]
    fn every_table_reaches_item() {
        for table in Table::ALL {
            assert!(table.item_column().is_some(), "{} has no item column", table.name());
        }
    }
}
