pub mod model;
pub mod reader;
pub mod deepzoom;
pub mod source;
pub mod transform;
pub mod cache;
pub mod http;

pub use model::{FrameColor, PixelRect, Style, TileMetadata};
pub use reader::{open_reader, PyramidReader, RasterReader};
pub use deepzoom::DeepZoomReader;
pub use source::{blank_tile, TileSource};
pub use transform::CoordinateTransform;
pub use cache::TileSourceCache;
pub use http::*;
