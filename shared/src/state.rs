use slidemap_atoms::tiles::TileSourceCache;
use slidemap_atoms::Store;

use crate::config::Config;

/// Everything a handler needs, built once per cold start.
pub struct AppState {
    pub store: Store,
    pub tiles: TileSourceCache,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> slidemap_atoms::Result<Self> {
        let store = Store::open(&config.db_path)?;
        let tiles = TileSourceCache::new(config.tile_cache_size, config.tile_size);
        tracing::info!(
            "State ready: db={} tile_cache={} tile_size={}",
            config.db_path,
            config.tile_cache_size,
            config.tile_size
        );
        Ok(AppState { store, tiles, config })
    }
}
