//! Raster bands.

use crate::core::error::{ConfigurationError, ConfigurationResult, TileGraphResult};
use crate::core::raster::{Raster, Rectangle};
use crate::core::types::DataType;
use crate::level::{AffineTransform, MultiLevelImage, MultiLevelModel, RasterMultiLevelSource};
use parking_lot::RwLock;
use std::sync::Arc;

/// A named raster layer of a product.
///
/// Pixel data is provided by the band's source image, which may be attached
/// after the band joined its product.
#[derive(Debug)]
pub struct Band {
    name: String,
    width: u32,
    height: u32,
    data_type: DataType,
    description: String,
    unit: Option<String>,
    no_data_value: Option<f64>,
    valid_pixel_expression: Option<String>,
    expression: Option<String>,
    source_image: RwLock<Option<Arc<MultiLevelImage>>>,
}

impl Band {
    /// Create a band without pixel data.
    pub fn new(name: impl Into<String>, data_type: DataType, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            data_type,
            description: String::new(),
            unit: None,
            no_data_value: None,
            valid_pixel_expression: None,
            expression: None,
            source_image: RwLock::new(None),
        }
    }

    /// Create a band backed by an in-memory raster with `level_count` levels.
    pub fn from_raster(name: impl Into<String>, raster: Raster, level_count: usize) -> ConfigurationResult<Self> {
        let model = MultiLevelModel::new(level_count, AffineTransform::identity(), raster.width(), raster.height())?;
        let band = Self::new(name, raster.data_type(), raster.width(), raster.height());
        let source = RasterMultiLevelSource::new(model, Arc::new(raster))?;
        Ok(band.with_source_image(Arc::new(MultiLevelImage::new(Arc::new(source)))))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_no_data_value(mut self, value: f64) -> Self {
        self.no_data_value = Some(value);
        self
    }

    pub fn with_valid_pixel_expression(mut self, expression: impl Into<String>) -> Self {
        self.valid_pixel_expression = Some(expression.into());
        self
    }

    /// Turn this band into a virtual band defined by a band maths expression.
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn with_source_image(self, image: Arc<MultiLevelImage>) -> Self {
        self.set_source_image(image);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Level-0 width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Level-0 height.
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn no_data_value(&self) -> Option<f64> {
        self.no_data_value
    }

    pub fn valid_pixel_expression(&self) -> Option<&str> {
        self.valid_pixel_expression.as_deref()
    }

    /// Band maths expression of a virtual band.
    pub fn expression(&self) -> Option<&str> {
        self.expression.as_deref()
    }

    pub fn is_virtual(&self) -> bool {
        self.expression.is_some()
    }

    /// Whether `value` is this band's no-data value. NaN never counts as valid.
    pub fn is_no_data(&self, value: f64) -> bool {
        value.is_nan() || self.no_data_value == Some(value)
    }

    /// Attach or replace the source image.
    pub fn set_source_image(&self, image: Arc<MultiLevelImage>) {
        *self.source_image.write() = Some(image);
    }

    pub fn source_image(&self) -> Option<Arc<MultiLevelImage>> {
        self.source_image.read().clone()
    }

    pub fn has_source_image(&self) -> bool {
        self.source_image.read().is_some()
    }

    /// The source image, or a configuration error if none is attached.
    pub fn require_source_image(&self) -> ConfigurationResult<Arc<MultiLevelImage>> {
        self.source_image().ok_or_else(|| ConfigurationError::NoSourceImage {
            band: self.name.clone(),
        })
    }

    /// Full rendering of a level.
    pub fn read_level(&self, level: usize) -> TileGraphResult<Arc<Raster>> {
        self.require_source_image()?.get_image(level)
    }

    /// A region of a level.
    pub fn read_tile(&self, level: usize, region: &Rectangle) -> TileGraphResult<Raster> {
        Ok(self.read_level(level)?.crop(region)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_from_raster() {
        let raster = Raster::from_fn(8, 4, DataType::Int16, |x, y| (x + y * 8) as f64);
        let band = Band::from_raster("b1", raster, 2)
            .unwrap()
            .with_unit("mW/(m^2*sr*nm)")
            .with_no_data_value(-1.0);

        assert_eq!(band.data_type(), DataType::Int16);
        assert!(band.has_source_image());
        assert!(band.is_no_data(-1.0));
        assert!(band.is_no_data(f64::NAN));
        assert!(!band.is_no_data(0.0));

        let tile = band.read_tile(0, &Rectangle::new(4, 2, 4, 2)).unwrap();
        assert_eq!(tile.sample(0, 0), 20.0);
        let level1 = band.read_level(1).unwrap();
        assert_eq!((level1.width(), level1.height()), (4, 2));
    }

    #[test]
    fn test_band_without_image() {
        let band = Band::new("v", DataType::Float32, 4, 4).with_expression("b1 * 2");
        assert!(band.is_virtual());
        assert!(matches!(
            band.read_level(0),
            Err(crate::core::error::TileGraphError::Configuration(ConfigurationError::NoSourceImage { .. }))
        ));
    }
}
