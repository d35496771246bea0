pub mod types;
pub mod spatial;
pub mod properties;
pub mod table;
pub mod import;
pub mod annotations;

pub use annotations::{get_annotation_metadata, get_annotations, post_annotations, Crs};
pub use properties::{get_property_catalog, PropertyConfig, PropertyIndexer};
pub use table::get_property_table;
