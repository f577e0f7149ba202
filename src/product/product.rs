//! Raster products: ordered band collections with masks and metadata.

use crate::core::error::{ConfigurationError, ConfigurationResult};
use crate::level::{AffineTransform, MultiLevelModel};
use crate::product::band::Band;
use crate::product::expression::NameReference;
use crate::product::metadata::MetadataElement;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A named mask defined by a band maths expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask {
    pub name: String,
    pub expression: String,
    pub description: String,
}

/// A product: bands of identical size in insertion order, plus masks and metadata.
#[derive(Debug)]
pub struct RasterProduct {
    name: String,
    product_type: String,
    width: u32,
    height: u32,
    description: String,
    bands: IndexMap<String, Arc<Band>>,
    masks: IndexMap<String, Mask>,
    metadata: MetadataElement,
    preferred_tile_size: Option<(u32, u32)>,
    num_resolutions: Option<usize>,
    image_to_model: AffineTransform,
}

impl RasterProduct {
    /// Create an empty product.
    pub fn new(name: impl Into<String>, product_type: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            product_type: product_type.into(),
            width,
            height,
            description: String::new(),
            bands: IndexMap::new(),
            masks: IndexMap::new(),
            metadata: MetadataElement::new("metadata"),
            preferred_tile_size: None,
            num_resolutions: None,
            image_to_model: AffineTransform::identity(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_preferred_tile_size(mut self, width: u32, height: u32) -> Self {
        self.preferred_tile_size = Some((width, height));
        self
    }

    pub fn with_num_resolutions(mut self, levels: usize) -> Self {
        self.num_resolutions = Some(levels);
        self
    }

    pub fn with_image_to_model(mut self, transform: AffineTransform) -> Self {
        self.image_to_model = transform;
        self
    }

    pub fn with_metadata(mut self, metadata: MetadataElement) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn product_type(&self) -> &str {
        &self.product_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn preferred_tile_size(&self) -> Option<(u32, u32)> {
        self.preferred_tile_size
    }

    pub fn num_resolutions(&self) -> Option<usize> {
        self.num_resolutions
    }

    pub fn image_to_model(&self) -> AffineTransform {
        self.image_to_model
    }

    pub fn metadata(&self) -> &MetadataElement {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataElement {
        &mut self.metadata
    }

    // ===== Bands =====

    /// Add a band. Names are unique and the size must match the product.
    pub fn add_band(&mut self, band: Band) -> ConfigurationResult<Arc<Band>> {
        if self.bands.contains_key(band.name()) {
            return Err(ConfigurationError::DuplicateBand {
                product: self.name.clone(),
                band: band.name().to_string(),
            });
        }
        if band.width() != self.width || band.height() != self.height {
            return Err(ConfigurationError::BandSizeMismatch {
                band: band.name().to_string(),
                width: band.width(),
                height: band.height(),
                product_width: self.width,
                product_height: self.height,
            });
        }
        let band = Arc::new(band);
        self.bands.insert(band.name().to_string(), Arc::clone(&band));
        Ok(band)
    }

    pub fn band(&self, name: &str) -> Option<&Arc<Band>> {
        self.bands.get(name)
    }

    /// Look up a band, failing if it does not exist.
    pub fn require_band(&self, name: &str) -> ConfigurationResult<&Arc<Band>> {
        self.bands.get(name).ok_or_else(|| ConfigurationError::UnknownBand {
            product: self.name.clone(),
            band: name.to_string(),
        })
    }

    pub fn contains_band(&self, name: &str) -> bool {
        self.bands.contains_key(name)
    }

    /// Bands in insertion order.
    pub fn bands(&self) -> impl Iterator<Item = &Arc<Band>> {
        self.bands.values()
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.keys().map(String::as_str).collect()
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Describe every node whose expression mentions `name` as a whole word.
    pub fn references_to(&self, name: &str) -> Vec<String> {
        let Some(reference) = NameReference::new(name) else {
            return Vec::new();
        };
        let mentions = |expression: Option<&str>| expression.is_some_and(|e| reference.is_referenced_in(e));

        let mut references = Vec::new();
        for band in self.bands.values().filter(|b| b.name() != name) {
            if mentions(band.expression()) {
                references.push(format!("virtual band '{}'", band.name()));
            }
            if mentions(band.valid_pixel_expression()) {
                references.push(format!("valid-pixel expression of '{}'", band.name()));
            }
        }
        for mask in self.masks.values() {
            if mentions(Some(mask.expression.as_str())) {
                references.push(format!("mask '{}'", mask.name));
            }
        }
        references
    }

    /// Remove a band that no other node refers to.
    pub fn remove_band(&mut self, name: &str) -> ConfigurationResult<Arc<Band>> {
        if !self.bands.contains_key(name) {
            return Err(ConfigurationError::UnknownBand {
                product: self.name.clone(),
                band: name.to_string(),
            });
        }
        let referenced_by = self.references_to(name);
        if !referenced_by.is_empty() {
            return Err(ConfigurationError::BandReferenced {
                band: name.to_string(),
                referenced_by,
            });
        }
        self.bands
            .shift_remove(name)
            .ok_or_else(|| ConfigurationError::UnknownBand {
                product: self.name.clone(),
                band: name.to_string(),
            })
    }

    // ===== Masks =====

    pub fn add_mask(&mut self, name: impl Into<String>, expression: impl Into<String>) -> ConfigurationResult<()> {
        let name = name.into();
        if self.masks.contains_key(&name) {
            return Err(ConfigurationError::DuplicateMask {
                product: self.name.clone(),
                mask: name,
            });
        }
        self.masks.insert(
            name.clone(),
            Mask {
                name,
                expression: expression.into(),
                description: String::new(),
            },
        );
        Ok(())
    }

    pub fn mask(&self, name: &str) -> Option<&Mask> {
        self.masks.get(name)
    }

    pub fn masks(&self) -> impl Iterator<Item = &Mask> {
        self.masks.values()
    }

    // ===== Geometry =====

    /// Pyramid geometry for this product's bands.
    ///
    /// Uses the declared number of resolutions, or enough levels for the
    /// coarsest one to fit into a single tile.
    pub fn multi_level_model(&self, tile_width: u32, tile_height: u32) -> ConfigurationResult<MultiLevelModel> {
        let levels = self.num_resolutions.unwrap_or_else(|| {
            MultiLevelModel::suggested_level_count(self.width, self.height, tile_width, tile_height)
        });
        MultiLevelModel::new(levels, self.image_to_model, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DataType;

    fn product() -> RasterProduct {
        let mut product = RasterProduct::new("MER_RR", "MER_RR__1P", 16, 16);
        product.add_band(Band::new("b1", DataType::Float32, 16, 16)).unwrap();
        product.add_band(Band::new("b2", DataType::Float32, 16, 16)).unwrap();
        product
    }

    #[test]
    fn test_band_order_and_uniqueness() {
        let mut product = product();
        assert_eq!(product.band_names(), vec!["b1", "b2"]);
        assert!(matches!(
            product.add_band(Band::new("b1", DataType::UInt8, 16, 16)),
            Err(ConfigurationError::DuplicateBand { .. })
        ));
        assert!(matches!(
            product.add_band(Band::new("b3", DataType::UInt8, 8, 16)),
            Err(ConfigurationError::BandSizeMismatch { .. })
        ));
        assert!(product.require_band("b9").is_err());
    }

    #[test]
    fn test_remove_referenced_band() {
        let mut product = product();
        product
            .add_band(Band::new("v", DataType::Float32, 16, 16).with_expression("b1 + b2"))
            .unwrap();
        product.add_mask("bright", "b2 > 0.5").unwrap();

        assert_eq!(product.references_to("b1"), vec!["virtual band 'v'"]);
        assert_eq!(product.references_to("b2"), vec!["virtual band 'v'", "mask 'bright'"]);
        let err = product.remove_band("b2").unwrap_err();
        assert!(matches!(err, ConfigurationError::BandReferenced { ref referenced_by, .. } if referenced_by.len() == 2));

        product.remove_band("v").unwrap();
        product.remove_band("b1").unwrap();
        assert_eq!(product.band_names(), vec!["b2"]);
        assert!(product.remove_band("b1").is_err());
    }

    #[test]
    fn test_masks_and_model() {
        let mut product = product().with_preferred_tile_size(4, 4);
        assert!(product.add_mask("m", "b1 > 0").is_ok());
        assert!(product.add_mask("m", "b2 > 0").is_err());
        assert_eq!(product.mask("m").unwrap().expression, "b1 > 0");

        let model = product.multi_level_model(4, 4).unwrap();
        assert_eq!(model.level_count(), 3);
        let product = product.with_num_resolutions(5);
        assert_eq!(product.multi_level_model(4, 4).unwrap().level_count(), 5);
    }
}
