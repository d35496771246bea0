//! Deep Zoom pyramids: a `.dzi` descriptor next to a `<name>_files/<level>/<x>_<y>.<format>` tree.

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImage};

use super::model::{PixelRect, TileMetadata};
use super::reader::{fit_within, PyramidReader};
use crate::error::{Error, Result};

/// Read a quoted XML attribute such as `TileSize="254"`.
fn attribute<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let key = format!("{}=\"", name);
    let start = xml.find(&key)? + key.len();
    let end = xml[start..].find('"')? + start;
    Some(&xml[start..end])
}

fn numeric<T: std::str::FromStr>(xml: &str, name: &str) -> Result<T> {
    attribute(xml, name)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::validation(format!("dzi descriptor is missing {}", name)))
}

pub struct DeepZoomReader {
    files_dir: PathBuf,
    format: String,
    overlap: u32,
    /// Deep Zoom level holding full resolution.
    max_level: u32,
    metadata: TileMetadata,
}

impl DeepZoomReader {
    pub fn open(dzi_path: &Path) -> Result<Self> {
        let xml = fs::read_to_string(dzi_path)?;
        Self::from_descriptor(dzi_path, &xml)
    }

    fn from_descriptor(dzi_path: &Path, xml: &str) -> Result<Self> {
        let tile_size: u32 = numeric(xml, "TileSize")?;
        let overlap: u32 = numeric(xml, "Overlap").unwrap_or(0);
        let format = attribute(xml, "Format").unwrap_or("jpeg").to_string();
        let size_x: u32 = numeric(xml, "Width")?;
        let size_y: u32 = numeric(xml, "Height")?;
        if tile_size == 0 || size_x == 0 || size_y == 0 {
            return Err(Error::validation("dzi descriptor has a zero dimension"));
        }

        let stem = dzi_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::validation("dzi path has no file name"))?;
        let files_dir = dzi_path.with_file_name(format!("{}_files", stem));

        let max_level = (size_x.max(size_y) as f64).log2().ceil() as u32;
        let levels = TileMetadata::levels_for(size_x, size_y, tile_size).min(max_level + 1);

        Ok(DeepZoomReader {
            files_dir,
            format,
            overlap,
            max_level,
            metadata: TileMetadata {
                size_x,
                size_y,
                levels,
                tile_width: tile_size,
                tile_height: tile_size,
                frames: None,
            },
        })
    }

    /// Deep Zoom level for pyramid level `z`.
    fn dz_level(&self, z: u32) -> u32 {
        self.max_level - (self.metadata.levels - 1 - z)
    }

    /// Tile (x, y) of Deep Zoom level `dz`, with the overlap border cut away.
    fn read_tile(&self, dz: u32, x: u32, y: u32, level_w: u32, level_h: u32) -> Result<DynamicImage> {
        let path = self
            .files_dir
            .join(dz.to_string())
            .join(format!("{}_{}.{}", x, y, self.format));
        let raw = image::open(&path)?;
        let tile = self.metadata.tile_width;
        let offset_x = if x > 0 { self.overlap } else { 0 };
        let offset_y = if y > 0 { self.overlap } else { 0 };
        let w = tile.min(level_w - x * tile).min(raw.width().saturating_sub(offset_x));
        let h = tile.min(level_h - y * tile).min(raw.height().saturating_sub(offset_y));
        Ok(raw.crop_imm(offset_x, offset_y, w, h))
    }

    /// Stitch `rect` of Deep Zoom level `dz` from its tiles.
    fn stitch(&self, dz: u32, rect: PixelRect) -> Result<DynamicImage> {
        let shift = self.max_level - dz;
        let level_w = self.metadata.size_x.div_ceil(1 << shift);
        let level_h = self.metadata.size_y.div_ceil(1 << shift);
        let tile = self.metadata.tile_width;

        let mut canvas = DynamicImage::new_rgb8(rect.width, rect.height);
        let mut first = true;
        for ty in rect.top / tile..=(rect.top + rect.height - 1) / tile {
            for tx in rect.left / tile..=(rect.left + rect.width - 1) / tile {
                let piece = self.read_tile(dz, tx, ty, level_w, level_h)?;
                if first && piece.color().channel_count() == 1 {
                    canvas = DynamicImage::new_luma8(rect.width, rect.height);
                }
                first = false;
                let (px, py) = (tx * tile, ty * tile);
                let src_x = rect.left.saturating_sub(px);
                let src_y = rect.top.saturating_sub(py);
                let dst_x = px.saturating_sub(rect.left);
                let dst_y = py.saturating_sub(rect.top);
                let w = (piece.width().saturating_sub(src_x)).min(rect.width - dst_x);
                let h = (piece.height().saturating_sub(src_y)).min(rect.height - dst_y);
                if w == 0 || h == 0 {
                    continue;
                }
                let part = piece.crop_imm(src_x, src_y, w, h);
                canvas
                    .copy_from(&part, dst_x, dst_y)
                    .map_err(Error::Image)?;
            }
        }
        Ok(canvas)
    }
}

impl PyramidReader for DeepZoomReader {
    fn metadata(&self) -> TileMetadata {
        self.metadata
    }

    fn tile(&self, z: u32, x: u32, y: u32, _frame: usize) -> Result<DynamicImage> {
        let (level_w, level_h) = self.metadata.level_size(z);
        self.read_tile(self.dz_level(z), x, y, level_w, level_h)
    }

    fn region(&self, rect: PixelRect, _frame: usize) -> Result<DynamicImage> {
        self.stitch(self.max_level, rect)
    }

    fn thumbnail(&self, max_edge: u32, _frame: usize) -> Result<DynamicImage> {
        // deepest level that still fits, then a final resize
        let fit = (max_edge.max(1) as f64).log2().floor() as u32;
        let dz = fit.min(self.max_level);
        let shift = self.max_level - dz;
        let rect = PixelRect {
            left: 0,
            top: 0,
            width: self.metadata.size_x.div_ceil(1 << shift),
            height: self.metadata.size_y.div_ceil(1 << shift),
        };
        Ok(fit_within(self.stitch(dz, rect)?, max_edge))
    }
}
