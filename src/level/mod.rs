//! Multi-resolution image pyramids.
//!
//! - `model`: pyramid geometry (level count, scales, transforms)
//! - `source`: uncached per-level rendering providers
//! - `file`: pyramids stored as one image file per level
//! - `image`: the per-level rendering cache

pub mod file;
pub mod image;
pub mod model;
pub mod source;

pub use file::FileMultiLevelSource;
pub use self::image::{ListenerId, MultiLevelImage, PropertyChangeEvent};
pub use model::{AffineTransform, ModelBounds, MultiLevelModel};
pub use source::{CombineFn, DerivedMultiLevelSource, MultiLevelSource, RasterMultiLevelSource, SharedSource};
