use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use super::model::Style;
use super::reader::open_reader;
use super::source::TileSource;
use crate::error::{Error, Result};

type Key = (String, String);

/// Bounded set of open tile sources keyed by (item id, style).
///
/// Sources for the same item share one reader, so a new style does not reopen the file.
#[derive(Clone)]
pub struct TileSourceCache {
    entries: Arc<Mutex<LruCache<Key, Arc<TileSource>>>>,
    tile_size: u32,
}

impl TileSourceCache {
    pub fn new(capacity: usize, tile_size: u32) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        TileSourceCache {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
            tile_size,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LruCache<Key, Arc<TileSource>>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Worker("tile cache lock poisoned".to_string()))
    }

    /// Cached source for `item_id`, opening `path` on a miss. Blocks on file IO.
    pub fn get_or_open(&self, item_id: &str, path: &Path, style: Option<Style>) -> Result<Arc<TileSource>> {
        let key = (
            item_id.to_string(),
            style.as_ref().map(Style::key).unwrap_or_default(),
        );

        let shared_reader = {
            let mut entries = self.lock()?;
            if let Some(source) = entries.get(&key) {
                tracing::debug!("Tile source cache hit for {}", item_id);
                return Ok(Arc::clone(source));
            }
            entries
                .iter()
                .find(|((id, _), _)| id == item_id)
                .map(|(_, source)| source.reader())
        };

        let reader = match shared_reader {
            Some(reader) => reader,
            None => {
                tracing::debug!("Opening tile source for {} at {}", item_id, path.display());
                open_reader(path, self.tile_size)?
            }
        };
        let source = Arc::new(TileSource::new(reader, style));

        let mut entries = self.lock()?;
        if let Some((evicted, _)) = entries.push(key, Arc::clone(&source)) {
            tracing::debug!("Evicted tile source {:?}", evicted);
        }
        Ok(source)
    }

    /// Drop every cached source for an item.
    pub fn evict_item(&self, item_id: &str) -> Result<()> {
        let mut entries = self.lock()?;
        let keys: Vec<Key> = entries
            .iter()
            .filter(|((id, _), _)| id == item_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            entries.pop(&key);
        }
        Ok(())
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn len(&self) -> usize {
        self.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn slide(dir: &Path, name: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        GrayImage::from_pixel(32, 32, Luma([1])).save(&path).unwrap();
        path
    }

    #[test]
    fn hits_reuse_sources() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = slide(dir.path(), "a.png");
        let cache = TileSourceCache::new(4, 256);
        let first = cache.get_or_open("a", &path, None).unwrap();
        let second = cache.get_or_open("a", &path, None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn styles_share_the_reader() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = slide(dir.path(), "a.png");
        let cache = TileSourceCache::new(4, 256);
        let plain = cache.get_or_open("a", &path, None).unwrap();
        let red = Style::parse(r#"[{"frame":0,"color":"red"}]"#).unwrap();
        let styled = cache.get_or_open("a", &path, Some(red)).unwrap();
        assert!(!Arc::ptr_eq(&plain, &styled));
        assert!(Arc::ptr_eq(&plain.reader(), &styled.reader()));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = TileSourceCache::new(2, 256);
        for id in ["a", "b", "c"] {
            let path = slide(dir.path(), &format!("{}.png", id));
            cache.get_or_open(id, &path, None).unwrap();
        }
        assert_eq!(cache.len(), 2);
        cache.evict_item("c").unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn missing_file_is_an_error() {
        let cache = TileSourceCache::new(2, 256);
        assert!(cache.get_or_open("x", Path::new("/nonexistent/slide.png"), None).is_err());
        assert!(cache.is_empty());
    }
}
