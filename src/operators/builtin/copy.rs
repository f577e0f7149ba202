//! Band copy operator.

use crate::core::error::{ConfigurationError, ConfigurationResult, TileGraphError, TileGraphResult};
use crate::core::operator::{Operator, OperatorKind, OperatorMetadata, PerTileOperator, TileRequest};
use crate::core::parameter::{ParameterDefinition, ParameterSet, SourceDefinition, SourceProducts};
use crate::core::raster::Raster;
use crate::core::types::{Value, ValueType};
use crate::operators::registry::OperatorRegistry;
use crate::product::{referenced_names, Band, RasterProduct};
use std::sync::Arc;

/// Register the copy operator.
pub fn register(registry: &mut OperatorRegistry) {
    registry.register_fn(CopyOperator::describe(), |config| {
        Ok(OperatorKind::PerTile(Box::new(CopyOperator::new(config.parameters, config.sources))))
    });
}

/// Validated configuration of [`CopyOperator`].
#[derive(Debug, Clone, PartialEq)]
pub struct CopyConfig {
    /// Bands to copy; all source bands when empty.
    pub band_names: Vec<String>,
}

impl CopyConfig {
    fn from_parameters(operator: &str, parameters: &ParameterSet) -> ConfigurationResult<Self> {
        let invalid = |error: String| ConfigurationError::InvalidParameter {
            operator: operator.to_string(),
            parameter: "band_names".to_string(),
            error,
        };
        let band_names = match parameters.get("band_names") {
            None | Some(Value::None) => Vec::new(),
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| {
                    v.as_string()
                        .map(str::to_string)
                        .ok_or_else(|| invalid(format!("band names must be strings, got {}", v.get_type())))
                })
                .collect::<ConfigurationResult<Vec<String>>>()?,
            Some(other) => return Err(invalid(format!("expected a list of band names, got {}", other.get_type()))),
        };
        Ok(Self { band_names })
    }

    fn validate(&self, source: &RasterProduct) -> ConfigurationResult<()> {
        for name in &self.band_names {
            let band = source.band(name).ok_or_else(|| ConfigurationError::UnknownBand {
                product: source.name().to_string(),
                band: name.clone(),
            })?;
            band.require_source_image()?;
        }
        Ok(())
    }
}

/// Copies bands of a source product, tile by tile.
///
/// The target product has the source's size, tiling, geocoding and metadata.
pub struct CopyOperator {
    parameters: ParameterSet,
    sources: SourceProducts,
    source: Option<Arc<RasterProduct>>,
}

impl CopyOperator {
    pub fn new(parameters: ParameterSet, sources: SourceProducts) -> Self {
        Self {
            parameters,
            sources,
            source: None,
        }
    }

    /// Operator metadata, available without an instance.
    pub fn describe() -> OperatorMetadata {
        OperatorMetadata::builder("Copy")
            .category("Raster/Data Conversion")
            .description("Copies bands of the source product")
            .authors("tilegraph")
            .version("1.0")
            .parameter(
                ParameterDefinition::new("band_names", ValueType::Array(Box::new(ValueType::String)))
                    .with_label("Source Bands")
                    .with_description("Names of the bands to copy, all bands if not given"),
            )
            .source(SourceDefinition::new("source").with_description("Product to copy"))
            .build()
    }
}

impl Operator for CopyOperator {
    fn metadata(&self) -> OperatorMetadata {
        Self::describe()
    }

    fn initialize(&mut self) -> ConfigurationResult<RasterProduct> {
        let metadata = Self::describe();
        let parameters = metadata.schema.resolve(&metadata.alias, &self.parameters)?;
        metadata.schema.check_sources(&metadata.alias, &self.sources)?;
        let source = Arc::clone(&self.sources["source"]);

        let mut config = CopyConfig::from_parameters(&metadata.alias, &parameters)?;
        if config.band_names.is_empty() {
            config.band_names = source.band_names().into_iter().map(str::to_string).collect();
        }
        config.validate(&source)?;

        let mut product = RasterProduct::new(source.name(), source.product_type(), source.width(), source.height())
            .with_description(source.description())
            .with_image_to_model(source.image_to_model())
            .with_metadata(source.metadata().clone());
        if let Some((width, height)) = source.preferred_tile_size() {
            product = product.with_preferred_tile_size(width, height);
        }

        let mut levels = usize::MAX;
        for name in &config.band_names {
            let band = source.require_band(name)?;
            levels = levels.min(band.require_source_image()?.level_count());
            product.add_band(copy_properties(band))?;
        }
        if levels != usize::MAX {
            product = product.with_num_resolutions(levels);
        }
        let dropped: Vec<&str> = source
            .band_names()
            .into_iter()
            .filter(|name| !config.band_names.iter().any(|b| b == name))
            .collect();
        for mask in source.masks() {
            let missing = referenced_names(&mask.expression, dropped.iter().copied());
            if missing.is_empty() {
                product.add_mask(mask.name.clone(), mask.expression.clone())?;
            } else {
                log::debug!("Skipping mask '{}' referencing uncopied bands {:?}", mask.name, missing);
            }
        }

        self.source = Some(source);
        Ok(product)
    }
}

impl PerTileOperator for CopyOperator {
    fn compute_tile(&self, band: &Band, request: &TileRequest) -> TileGraphResult<Raster> {
        let source = self.source.as_ref().ok_or_else(|| {
            TileGraphError::illegal_state("compute tile", "operator 'Copy' is not initialized")
        })?;
        source.require_band(band.name())?.read_tile(request.level, &request.rect)
    }
}

fn copy_properties(band: &Band) -> Band {
    let mut copy = Band::new(band.name(), band.data_type(), band.width(), band.height())
        .with_description(band.description());
    if let Some(unit) = band.unit() {
        copy = copy.with_unit(unit);
    }
    if let Some(value) = band.no_data_value() {
        copy = copy.with_no_data_value(value);
    }
    if let Some(expression) = band.valid_pixel_expression() {
        copy = copy.with_valid_pixel_expression(expression);
    }
    copy
}
