use std::env;
use std::str::FromStr;

use annotations_block::PropertyConfig;

/// Runtime settings, read once at cold start.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub tile_cache_size: usize,
    pub tile_size: u32,
    pub thumbnail_size: u32,
    pub properties: PropertyConfig,
}

fn parsed<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("{}={:?} is not valid, using the default", name, raw);
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = PropertyConfig::default();
        Config {
            db_path: env::var("SLIDEMAP_DB_PATH").unwrap_or_else(|_| "slidemap.db".to_string()),
            tile_cache_size: parsed("SLIDEMAP_TILE_CACHE_SIZE", 32),
            tile_size: parsed("SLIDEMAP_TILE_SIZE", 256),
            thumbnail_size: parsed("SLIDEMAP_THUMBNAIL_SIZE", 256),
            properties: PropertyConfig {
                depth: parsed("SLIDEMAP_PROPERTY_DEPTH", defaults.depth),
                separator: env::var("SLIDEMAP_PROPERTY_SEPARATOR").unwrap_or(defaults.separator),
            },
        }
    }

    /// Defaults with an in-memory database.
    pub fn in_memory() -> Self {
        Config {
            db_path: ":memory:".to_string(),
            tile_cache_size: 32,
            tile_size: 256,
            thumbnail_size: 256,
            properties: PropertyConfig::default(),
        }
    }
}
