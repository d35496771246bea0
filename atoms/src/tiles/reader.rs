//! Pyramidal image readers.
//!
//! [`PyramidReader`] is the seam to whatever decodes slide pixels. Two readers
//! ship here: [`RasterReader`] for plain images (or a directory of single
//! channel frames) with levels synthesised by downsampling, and
//! [`DeepZoomReader`](super::deepzoom::DeepZoomReader) for pre-tiled pyramids.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::imageops::FilterType;
use image::DynamicImage;

use super::deepzoom::DeepZoomReader;
use super::model::{PixelRect, TileMetadata};
use crate::error::{Error, Result};

pub trait PyramidReader: Send + Sync {
    fn metadata(&self) -> TileMetadata;

    /// One frame of tile (z, x, y). Coordinates are already range checked.
    fn tile(&self, z: u32, x: u32, y: u32, frame: usize) -> Result<DynamicImage>;

    /// One frame of a full-resolution region.
    fn region(&self, rect: PixelRect, frame: usize) -> Result<DynamicImage>;

    /// One frame of the whole image, no larger than `max_edge` on either side.
    fn thumbnail(&self, max_edge: u32, frame: usize) -> Result<DynamicImage>;
}

/// Open the reader matching `path`.
pub fn open_reader(path: &Path, tile_size: u32) -> Result<Arc<dyn PyramidReader>> {
    let is_dzi = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("dzi"));
    if is_dzi {
        Ok(Arc::new(DeepZoomReader::open(path)?))
    } else {
        Ok(Arc::new(RasterReader::open(path, tile_size)?))
    }
}

/// Scale `image` down so neither side exceeds `max_edge`.
pub(crate) fn fit_within(image: DynamicImage, max_edge: u32) -> DynamicImage {
    let max_edge = max_edge.max(1);
    if image.width() <= max_edge && image.height() <= max_edge {
        image
    } else {
        image.resize(max_edge, max_edge, FilterType::Triangle)
    }
}

/// Whole images held in memory; one decoded image per frame.
pub struct RasterReader {
    frames: Vec<DynamicImage>,
    metadata: TileMetadata,
}

impl RasterReader {
    /// Open an image file, or a directory whose image files are the frames in name order.
    pub fn open(path: &Path, tile_size: u32) -> Result<Self> {
        let frames = if path.is_dir() {
            let mut files: Vec<PathBuf> = fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && image::ImageFormat::from_path(p).is_ok())
                .collect();
            files.sort();
            if files.is_empty() {
                return Err(Error::validation(format!("no frame images in {}", path.display())));
            }
            files
                .iter()
                .map(|f| Ok(image::open(f)?))
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![image::open(path)?]
        };
        Self::from_frames(frames, tile_size)
    }

    pub fn from_frames(frames: Vec<DynamicImage>, tile_size: u32) -> Result<Self> {
        let first = frames
            .first()
            .ok_or_else(|| Error::validation("reader needs at least one frame"))?;
        let (size_x, size_y) = (first.width(), first.height());
        if frames.iter().any(|f| f.width() != size_x || f.height() != size_y) {
            return Err(Error::validation("all frames must share one size"));
        }
        let tile_size = tile_size.max(1);
        let metadata = TileMetadata {
            size_x,
            size_y,
            levels: TileMetadata::levels_for(size_x, size_y, tile_size),
            tile_width: tile_size,
            tile_height: tile_size,
            frames: (frames.len() > 1).then_some(frames.len() as u32),
        };
        Ok(RasterReader { frames, metadata })
    }

    fn frame(&self, frame: usize) -> Result<&DynamicImage> {
        self.frames
            .get(frame)
            .ok_or_else(|| Error::validation(format!("frame {} does not exist", frame)))
    }
}

impl PyramidReader for RasterReader {
    fn metadata(&self) -> TileMetadata {
        self.metadata
    }

    fn tile(&self, z: u32, x: u32, y: u32, frame: usize) -> Result<DynamicImage> {
        let m = &self.metadata;
        let scale = m.downsample(z);
        let (level_w, level_h) = m.level_size(z);
        let left = x * m.tile_width;
        let top = y * m.tile_height;
        let out_w = m.tile_width.min(level_w - left);
        let out_h = m.tile_height.min(level_h - top);

        let src_left = left * scale;
        let src_top = top * scale;
        let src_w = (out_w * scale).min(m.size_x - src_left);
        let src_h = (out_h * scale).min(m.size_y - src_top);

        let crop = self.frame(frame)?.crop_imm(src_left, src_top, src_w, src_h);
        Ok(if scale == 1 {
            crop
        } else {
            crop.resize_exact(out_w, out_h, FilterType::Triangle)
        })
    }

    fn region(&self, rect: PixelRect, frame: usize) -> Result<DynamicImage> {
        Ok(self
            .frame(frame)?
            .crop_imm(rect.left, rect.top, rect.width, rect.height))
    }

    fn thumbnail(&self, max_edge: u32, frame: usize) -> Result<DynamicImage> {
        Ok(fit_within(self.frame(frame)?.clone(), max_edge))
    }
}
