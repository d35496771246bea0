use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, GrayImage, ImageOutputFormat, RgbImage};

use super::model::{PixelRect, Style, TileMetadata};
use super::reader::PyramidReader;
use crate::error::Result;

/// A reader paired with the frame styling applied to everything it serves.
pub struct TileSource {
    reader: Arc<dyn PyramidReader>,
    style: Option<Style>,
}

impl TileSource {
    pub fn new(reader: Arc<dyn PyramidReader>, style: Option<Style>) -> Self {
        TileSource { reader, style }
    }

    pub fn reader(&self) -> Arc<dyn PyramidReader> {
        Arc::clone(&self.reader)
    }

    pub fn metadata(&self) -> TileMetadata {
        self.reader.metadata()
    }

    /// Style in effect: the requested one, else RGB for three-frame images.
    fn effective_style(&self) -> Option<Style> {
        match &self.style {
            Some(style) => Some(style.clone()),
            None if self.metadata().frame_count() == 3 => Some(Style::rgb()),
            None => None,
        }
    }

    /// Compose one image from the frames `read` yields.
    fn compose(&self, read: impl Fn(usize) -> Result<DynamicImage>) -> Result<DynamicImage> {
        let Some(style) = self.effective_style() else {
            return read(0);
        };
        let mut out: Option<RgbImage> = None;
        for fc in &style.frames {
            let frame = read(fc.frame)?.to_luma8();
            let canvas = out.get_or_insert_with(|| RgbImage::new(frame.width(), frame.height()));
            let [r, g, b, a] = fc.color.0;
            let alpha = a as f32 / 255.0;
            for (dst, src) in canvas.pixels_mut().zip(frame.pixels()) {
                let v = src.0[0] as f32 / 255.0 * alpha;
                for (channel, color) in dst.0.iter_mut().zip([r, g, b]) {
                    *channel = (*channel as f32 + v * color as f32).round().min(255.0) as u8;
                }
            }
        }
        Ok(out.map(DynamicImage::ImageRgb8).unwrap_or_else(|| DynamicImage::new_luma8(1, 1)))
    }

    /// PNG tile; out-of-range coordinates fail with [`Error::OutOfRange`](crate::Error::OutOfRange).
    pub fn tile(&self, z: i64, x: i64, y: i64) -> Result<Vec<u8>> {
        let (z, x, y) = self.metadata().check_tile(z, x, y)?;
        let image = self.compose(|frame| self.reader.tile(z, x, y, frame))?;
        encode_png(&image)
    }

    /// Like [`tile`](Self::tile) but any failure yields the blank tile.
    pub fn tile_or_blank(&self, z: i64, x: i64, y: i64) -> Result<Vec<u8>> {
        match self.tile(z, x, y) {
            Ok(png) => Ok(png),
            Err(e) => {
                tracing::warn!("Serving blank tile for ({}, {}, {}): {}", z, x, y, e);
                self.blank()
            }
        }
    }

    /// PNG of a full-resolution pixel region, clamped to the image.
    pub fn region(&self, left: f64, top: f64, right: f64, bottom: f64) -> Result<Vec<u8>> {
        let m = self.metadata();
        let Some(rect) = PixelRect::clamped(left, top, right, bottom, m.size_x, m.size_y) else {
            return self.blank();
        };
        let read = self.compose(|frame| self.reader.region(rect, frame));
        match read {
            Ok(image) => encode_png(&image),
            Err(e) => {
                tracing::warn!("Serving blank region for {:?}: {}", rect, e);
                self.blank()
            }
        }
    }

    pub fn thumbnail(&self, max_edge: u32) -> Result<Vec<u8>> {
        let image = self.compose(|frame| self.reader.thumbnail(max_edge, frame))?;
        encode_png(&image)
    }

    fn blank(&self) -> Result<Vec<u8>> {
        let m = self.metadata();
        blank_tile(m.tile_width, m.tile_height)
    }
}

/// All-zero single channel PNG.
pub fn blank_tile(width: u32, height: u32) -> Result<Vec<u8>> {
    encode_png(&DynamicImage::ImageLuma8(GrayImage::new(width, height)))
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::reader::RasterReader;
    use crate::Error;
    use image::{Luma, Rgb};

    fn flat(value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(300, 200, Luma([value])))
    }

    fn source(frames: Vec<DynamicImage>, style: Option<Style>) -> TileSource {
        TileSource::new(Arc::new(RasterReader::from_frames(frames, 256).unwrap()), style)
    }

    fn decode(png: &[u8]) -> DynamicImage {
        image::load_from_memory(png).unwrap()
    }

    #[test]
    fn out_of_range_tiles_are_blank() {
        let src = source(vec![flat(200)], None);
        for (z, x, y) in [(-1, 0, 0), (0, -1, 0), (0, 0, -3), (9, 0, 0), (1, 5, 0)] {
            assert!(matches!(src.tile(z, x, y), Err(Error::OutOfRange { .. })));
            let blank = decode(&src.tile_or_blank(z, x, y).unwrap()).to_luma8();
            assert_eq!(blank.dimensions(), (256, 256));
            assert!(blank.pixels().all(|p| p.0[0] == 0));
        }
    }

    #[test]
    fn three_frames_default_to_rgb() {
        let src = source(vec![flat(255), flat(0), flat(128)], None);
        let tile = decode(&src.tile(1, 0, 0).unwrap()).to_rgb8();
        assert_eq!(tile.get_pixel(0, 0), &Rgb([255, 0, 128]));
    }

    #[test]
    fn style_blends_additively() {
        let style = Style::parse(r##"[{"frame":0,"color":"#ff0000"},{"frame":1,"color":"rgb(255,255,0)"}]"##).unwrap();
        let src = source(vec![flat(255), flat(51)], Some(style));
        let tile = decode(&src.tile(1, 0, 0).unwrap()).to_rgb8();
        assert_eq!(tile.get_pixel(0, 0), &Rgb([255, 51, 0]));
    }

    #[test]
    fn single_frame_served_as_stored() {
        let src = source(vec![flat(77)], None);
        let tile = decode(&src.tile(1, 1, 0).unwrap());
        assert_eq!(tile.width(), 44);
        assert_eq!(tile.to_luma8().get_pixel(0, 0), &Luma([77]));
    }

    #[test]
    fn region_is_clamped_crop() {
        let src = source(vec![flat(9)], None);
        let region = decode(&src.region(250.0, 150.0, 400.0, 400.0).unwrap());
        assert_eq!((region.width(), region.height()), (50, 50));
        let empty = decode(&src.region(500.0, 500.0, 600.0, 600.0).unwrap());
        assert_eq!((empty.width(), empty.height()), (256, 256));
    }

    #[test]
    fn thumbnail_bounded() {
        let src = source(vec![flat(9)], None);
        let thumb = decode(&src.thumbnail(64).unwrap());
        assert!(thumb.width() <= 64 && thumb.height() <= 64);
    }
}
