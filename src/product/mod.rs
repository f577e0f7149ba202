//! Bands, raster products and product metadata.

pub mod band;
pub mod expression;
pub mod metadata;
#[allow(clippy::module_inception)]
pub mod product;

pub use band::Band;
pub use expression::{is_name_referenced, referenced_names, NameReference};
pub use metadata::{MetadataAttribute, MetadataElement};
pub use product::{Mask, RasterProduct};
