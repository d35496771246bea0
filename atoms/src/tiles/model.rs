use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pyramid geometry as reported to viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileMetadata {
    pub size_x: u32,
    pub size_y: u32,
    pub levels: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames: Option<u32>,
}

impl TileMetadata {
    /// Level count for a square-tiled pyramid whose top level fits one tile.
    pub fn levels_for(size_x: u32, size_y: u32, tile_size: u32) -> u32 {
        let tile = tile_size.max(1) as f64;
        let ratio = size_x.max(size_y).max(1) as f64 / tile;
        (ratio.log2().ceil().max(0.0) as u32) + 1
    }

    /// Downsampling factor of level `z` relative to full resolution.
    pub fn downsample(&self, z: u32) -> u32 {
        1u32 << (self.levels.saturating_sub(1).saturating_sub(z)).min(31)
    }

    /// Pixel size of level `z`.
    pub fn level_size(&self, z: u32) -> (u32, u32) {
        let d = self.downsample(z);
        (self.size_x.div_ceil(d), self.size_y.div_ceil(d))
    }

    /// Number of tile columns and rows at level `z`.
    pub fn grid(&self, z: u32) -> (u32, u32) {
        let (w, h) = self.level_size(z);
        (
            w.div_ceil(self.tile_width.max(1)),
            h.div_ceil(self.tile_height.max(1)),
        )
    }

    pub fn frame_count(&self) -> usize {
        self.frames.unwrap_or(1).max(1) as usize
    }

    /// Validate signed tile coordinates against the pyramid.
    pub fn check_tile(&self, z: i64, x: i64, y: i64) -> Result<(u32, u32, u32)> {
        let out_of_range = || Error::OutOfRange { z, x, y };
        if z < 0 || x < 0 || y < 0 || z >= self.levels as i64 {
            return Err(out_of_range());
        }
        let (cols, rows) = self.grid(z as u32);
        if x >= cols as i64 || y >= rows as i64 {
            return Err(out_of_range());
        }
        Ok((z as u32, x as u32, y as u32))
    }
}

/// Pixel-space rectangle, `left..right` by `top..bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Clamp a float region to the image. `None` when nothing remains.
    pub fn clamped(left: f64, top: f64, right: f64, bottom: f64, size_x: u32, size_y: u32) -> Option<PixelRect> {
        let (x0, x1) = (left.min(right), left.max(right));
        let (y0, y1) = (top.min(bottom), top.max(bottom));
        let x0 = x0.floor().clamp(0.0, size_x as f64) as u32;
        let y0 = y0.floor().clamp(0.0, size_y as f64) as u32;
        let x1 = x1.ceil().clamp(0.0, size_x as f64) as u32;
        let y1 = y1.ceil().clamp(0.0, size_y as f64) as u32;
        (x1 > x0 && y1 > y0).then_some(PixelRect {
            left: x0,
            top: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}

/// Colour assigned to one frame when composing a multi-frame image.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameColor {
    pub frame: usize,
    pub color: Rgba<u8>,
}

/// Ordered frame to colour assignment. Frames blend additively.
#[derive(Debug, Clone, PartialEq)]
pub struct Style {
    pub frames: Vec<FrameColor>,
}

#[derive(Deserialize)]
struct RawFrameColor {
    frame: usize,
    color: String,
}

impl Style {
    /// Parse `[{"frame": 0, "color": "#ff0000"}, ...]`.
    pub fn parse(raw: &str) -> Result<Style> {
        let entries: Vec<RawFrameColor> = serde_json::from_str(raw)
            .map_err(|e| Error::validation(format!("invalid style: {}", e)))?;
        if entries.is_empty() {
            return Err(Error::validation("style needs at least one frame"));
        }
        let frames = entries
            .into_iter()
            .map(|e| {
                Ok(FrameColor {
                    frame: e.frame,
                    color: parse_color(&e.color)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Style { frames })
    }

    /// Frame i painted in primary i.
    pub fn rgb() -> Style {
        let primaries = [[255, 0, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255]];
        Style {
            frames: primaries
                .into_iter()
                .enumerate()
                .map(|(frame, c)| FrameColor { frame, color: Rgba(c) })
                .collect(),
        }
    }

    /// Canonical form used as a cache key.
    pub fn key(&self) -> String {
        self.frames
            .iter()
            .map(|f| {
                let [r, g, b, a] = f.color.0;
                format!("{}:{:02x}{:02x}{:02x}{:02x}", f.frame, r, g, b, a)
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Accepts `#rgb`, `#rrggbb`, `#rrggbbaa`, `rgb(r,g,b)`, `rgba(r,g,b,a)` and a few names.
pub fn parse_color(raw: &str) -> Result<Rgba<u8>> {
    let s = raw.trim().to_ascii_lowercase();
    let invalid = || Error::validation(format!("invalid color {}", raw));

    if let Some(hex) = s.strip_prefix('#') {
        let expanded: String = match hex.len() {
            3 => hex.chars().flat_map(|c| [c, c]).collect(),
            6 | 8 => hex.to_string(),
            _ => return Err(invalid()),
        };
        let byte = |i: usize| -> Result<u8> {
            let pair = expanded.get(i..i + 2).ok_or_else(invalid)?;
            u8::from_str_radix(pair, 16).map_err(|_| invalid())
        };
        let alpha = if expanded.len() == 8 { byte(6)? } else { 255 };
        return Ok(Rgba([byte(0)?, byte(2)?, byte(4)?, alpha]));
    }

    if let Some(inner) = s
        .strip_prefix("rgba(")
        .or_else(|| s.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let parts: Vec<f64> = inner
            .split(',')
            .map(|p| p.trim().parse::<f64>().map_err(|_| invalid()))
            .collect::<Result<_>>()?;
        let channel = |v: f64| v.round().clamp(0.0, 255.0) as u8;
        return match parts.as_slice() {
            [r, g, b] => Ok(Rgba([channel(*r), channel(*g), channel(*b), 255])),
            // alpha is either 0..=1 or 0..=255
            [r, g, b, a] => {
                let a = if *a <= 1.0 { a * 255.0 } else { *a };
                Ok(Rgba([channel(*r), channel(*g), channel(*b), channel(a)]))
            }
            _ => Err(invalid()),
        };
    }

    match s.as_str() {
        "red" => Ok(Rgba([255, 0, 0, 255])),
        "green" => Ok(Rgba([0, 255, 0, 255])),
        "blue" => Ok(Rgba([0, 0, 255, 255])),
        "white" => Ok(Rgba([255, 255, 255, 255])),
        "black" => Ok(Rgba([0, 0, 0, 255])),
        _ => Err(invalid()),
    }
}
