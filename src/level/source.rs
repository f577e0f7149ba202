//! Providers of per-level renderings.
//!
//! A [`MultiLevelSource`] creates the raster of a pyramid level on every call.
//! It never caches: that is what [`MultiLevelImage`](super::MultiLevelImage) is for.

use crate::core::error::{ConfigurationError, IndexError, TileGraphResult};
use crate::core::raster::Raster;
use crate::level::model::MultiLevelModel;
use std::fmt;
use std::sync::Arc;

/// Creates renderings of the levels of one pyramid.
pub trait MultiLevelSource: Send + Sync {
    /// Geometry of the pyramid.
    fn model(&self) -> &MultiLevelModel;

    /// Create the rendering of `level`.
    ///
    /// Fails with an index error for levels outside `[0, level_count)`.
    fn create_image(&self, level: usize) -> TileGraphResult<Arc<Raster>>;

    /// Drop state the source keeps between renderings.
    ///
    /// Called by [`MultiLevelImage::reset`](super::MultiLevelImage::reset).
    fn reset(&self) {}
}

/// A shareable source.
pub type SharedSource = Arc<dyn MultiLevelSource>;

/// Combines the renderings of all upstream sources at one level.
pub type CombineFn = Arc<dyn Fn(&[Arc<Raster>], usize) -> TileGraphResult<Raster> + Send + Sync>;

/// Source backed by an in-memory level-0 raster.
///
/// Level 0 hands out the wrapped raster itself, other levels are
/// nearest-neighbour subsamples of it.
pub struct RasterMultiLevelSource {
    model: MultiLevelModel,
    raster: Arc<Raster>,
}

impl RasterMultiLevelSource {
    /// Wrap a raster. The model must describe the raster's dimensions.
    pub fn new(model: MultiLevelModel, raster: Arc<Raster>) -> Result<Self, ConfigurationError> {
        if model.width() != raster.width() || model.height() != raster.height() {
            return Err(ConfigurationError::Other(format!(
                "Model size {}x{} does not match raster size {}x{}",
                model.width(),
                model.height(),
                raster.width(),
                raster.height()
            )));
        }
        Ok(Self { model, raster })
    }
}

impl MultiLevelSource for RasterMultiLevelSource {
    fn model(&self) -> &MultiLevelModel {
        &self.model
    }

    fn create_image(&self, level: usize) -> TileGraphResult<Arc<Raster>> {
        let (width, height) = self.model.level_size(level)?;
        if level == 0 {
            return Ok(Arc::clone(&self.raster));
        }
        Ok(Arc::new(self.raster.subsample(width, height)))
    }
}

impl fmt::Debug for RasterMultiLevelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterMultiLevelSource")
            .field("model", &self.model)
            .finish()
    }
}

/// Source derived from several upstream sources of identical geometry.
pub struct DerivedMultiLevelSource {
    model: MultiLevelModel,
    sources: Vec<SharedSource>,
    combine: CombineFn,
}

impl DerivedMultiLevelSource {
    /// Create a derived source.
    ///
    /// Fails unless every upstream source shares the model of the first one.
    pub fn new(sources: Vec<SharedSource>, combine: CombineFn) -> Result<Self, ConfigurationError> {
        let first = sources.first().ok_or(ConfigurationError::EmptySources)?;
        let model = first.model().clone();
        for (index, source) in sources.iter().enumerate().skip(1) {
            let other = source.model();
            if other.level_count() != model.level_count() {
                return Err(ConfigurationError::ModelMismatch {
                    index,
                    reason: format!(
                        "level count {} differs from {}",
                        other.level_count(),
                        model.level_count()
                    ),
                });
            }
            if *other != model {
                return Err(ConfigurationError::ModelMismatch {
                    index,
                    reason: "geometry differs".to_string(),
                });
            }
        }
        Ok(Self {
            model,
            sources,
            combine,
        })
    }

    /// Upstream sources in combination order.
    pub fn sources(&self) -> &[SharedSource] {
        &self.sources
    }
}

impl MultiLevelSource for DerivedMultiLevelSource {
    fn model(&self) -> &MultiLevelModel {
        &self.model
    }

    fn create_image(&self, level: usize) -> TileGraphResult<Arc<Raster>> {
        self.model.check_level(level)?;
        let inputs = self
            .sources
            .iter()
            .map(|source| source.create_image(level))
            .collect::<TileGraphResult<Vec<_>>>()?;
        let combined = (self.combine)(&inputs, level)?;
        let (width, height) = self.model.level_size(level)?;
        if combined.width() != width || combined.height() != height {
            return Err(IndexError::RegionOutOfBounds {
                region: combined.bounds(),
                width,
                height,
            }
            .into());
        }
        Ok(Arc::new(combined))
    }
}

impl fmt::Debug for DerivedMultiLevelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedMultiLevelSource")
            .field("model", &self.model)
            .field("sources", &self.sources.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DataType;
    use crate::level::model::AffineTransform;

    fn constant_source(value: f64, levels: usize) -> SharedSource {
        let model = MultiLevelModel::new(levels, AffineTransform::identity(), 8, 8).unwrap();
        let raster = Arc::new(Raster::filled(8, 8, DataType::Float32, value));
        Arc::new(RasterMultiLevelSource::new(model, raster).unwrap())
    }

    fn sum() -> CombineFn {
        Arc::new(|inputs: &[Arc<Raster>], _level: usize| {
            let first = &inputs[0];
            Ok(Raster::from_fn(first.width(), first.height(), DataType::Float32, |x, y| {
                inputs.iter().map(|r| r.sample(x, y)).sum()
            }))
        })
    }

    #[test]
    fn test_raster_source_levels() {
        let source = constant_source(3.0, 3);
        let level0 = source.create_image(0).unwrap();
        assert!(Arc::ptr_eq(&level0, &source.create_image(0).unwrap()));

        let level2 = source.create_image(2).unwrap();
        assert_eq!((level2.width(), level2.height()), (2, 2));
        assert_eq!(level2.sample(1, 1), 3.0);
        assert!(source.create_image(3).is_err());
    }

    #[test]
    fn test_derived_source_combines_levels() {
        let derived = DerivedMultiLevelSource::new(vec![constant_source(1.0, 3), constant_source(2.0, 3)], sum()).unwrap();
        let level1 = derived.create_image(1).unwrap();
        assert_eq!((level1.width(), level1.height()), (4, 4));
        assert!(level1.samples().iter().all(|&v| v == 3.0));
        // no memoization
        assert!(!Arc::ptr_eq(&level1, &derived.create_image(1).unwrap()));
    }

    #[test]
    fn test_derived_source_rejects_mismatched_models() {
        let err = DerivedMultiLevelSource::new(vec![constant_source(1.0, 3), constant_source(2.0, 4)], sum()).unwrap_err();
        assert!(matches!(err, ConfigurationError::ModelMismatch { index: 1, .. }));

        let shifted = {
            let model = MultiLevelModel::new(3, AffineTransform::translation(5.0, 0.0), 8, 8).unwrap();
            let raster = Arc::new(Raster::new(8, 8, DataType::Float32));
            Arc::new(RasterMultiLevelSource::new(model, raster).unwrap()) as SharedSource
        };
        assert!(DerivedMultiLevelSource::new(vec![constant_source(1.0, 3), shifted], sum()).is_err());
        assert!(matches!(
            DerivedMultiLevelSource::new(Vec::new(), sum()),
            Err(ConfigurationError::EmptySources)
        ));
    }
}
