//! Normalized difference index, e.g. NDVI from red and near-infrared bands.
//!
//! The index band and its flag band are produced together from one read of
//! the two source tiles.

use crate::core::error::{ConfigurationError, ConfigurationResult, TileGraphError, TileGraphResult};
use crate::core::operator::{Operator, OperatorKind, OperatorMetadata, StackOperator, TileRequest};
use crate::core::parameter::{Interval, ParameterDefinition, ParameterSet, SourceDefinition, SourceProducts};
use crate::core::raster::Raster;
use crate::core::types::{DataType, ValueType};
use crate::operators::registry::OperatorRegistry;
use crate::product::{Band, MetadataAttribute, MetadataElement, RasterProduct};
use indexmap::IndexMap;
use std::sync::Arc;

pub const INDEX_BAND: &str = "nd";
pub const FLAGS_BAND: &str = "nd_flags";

/// The index could not be computed (no-data input or zero denominator).
pub const ARITHMETIC_FLAG: u8 = 0x01;
/// The index is below -1.
pub const LOW_FLAG: u8 = 0x02;
/// The index is above 1.
pub const HIGH_FLAG: u8 = 0x04;

/// Register the normalized difference operator.
pub fn register(registry: &mut OperatorRegistry) {
    registry.register_fn(NormalizedDifference::describe(), |config| {
        Ok(OperatorKind::Stack(Box::new(NormalizedDifference::new(
            config.parameters,
            config.sources,
        ))))
    });
}

/// Validated configuration of [`NormalizedDifference`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedDifferenceConfig {
    pub lower_band: String,
    pub upper_band: String,
    pub lower_factor: f64,
    pub upper_factor: f64,
}

impl NormalizedDifferenceConfig {
    fn from_parameters(operator: &str, parameters: &ParameterSet) -> ConfigurationResult<Self> {
        Ok(Self {
            lower_band: parameters.require_string(operator, "red_band")?,
            upper_band: parameters.require_string(operator, "nir_band")?,
            lower_factor: parameters.require_float(operator, "red_factor")?,
            upper_factor: parameters.require_float(operator, "nir_factor")?,
        })
    }

    fn validate(&self, operator: &str) -> ConfigurationResult<()> {
        if self.lower_band == self.upper_band {
            return Err(ConfigurationError::InvalidParameter {
                operator: operator.to_string(),
                parameter: "nir_band".to_string(),
                error: format!("red and NIR band are both '{}'", self.lower_band),
            });
        }
        Ok(())
    }

    /// Index value and flags of one pixel.
    pub fn compute(&self, lower: f64, upper: f64) -> (f64, u8) {
        let lower = lower * self.lower_factor;
        let upper = upper * self.upper_factor;
        let sum = upper + lower;
        if !lower.is_finite() || !upper.is_finite() || sum == 0.0 {
            return (f64::NAN, ARITHMETIC_FLAG);
        }
        let index = (upper - lower) / sum;
        let flags = if index < -1.0 {
            LOW_FLAG
        } else if index > 1.0 {
            HIGH_FLAG
        } else {
            0
        };
        (index, flags)
    }
}

/// Computes `(upper - lower) / (upper + lower)` and a flag band.
pub struct NormalizedDifference {
    parameters: ParameterSet,
    sources: SourceProducts,
    state: Option<(NormalizedDifferenceConfig, Arc<Band>, Arc<Band>)>,
}

impl NormalizedDifference {
    pub fn new(parameters: ParameterSet, sources: SourceProducts) -> Self {
        Self {
            parameters,
            sources,
            state: None,
        }
    }

    /// Operator metadata, available without an instance.
    pub fn describe() -> OperatorMetadata {
        OperatorMetadata::builder("NormalizedDifference")
            .category("Raster/Indices")
            .description("Normalized difference of two bands with a flag band")
            .authors("tilegraph")
            .version("1.0")
            .parameter(
                ParameterDefinition::new("red_band", ValueType::String)
                    .with_label("Red Band")
                    .with_default("red")
                    .not_null(),
            )
            .parameter(
                ParameterDefinition::new("nir_band", ValueType::String)
                    .with_label("NIR Band")
                    .with_default("nir")
                    .not_null(),
            )
            .parameter(factor_parameter("red_factor", "Red Factor"))
            .parameter(factor_parameter("nir_factor", "NIR Factor"))
            .source(SourceDefinition::new("source"))
            .build()
    }

    fn flag_coding() -> MetadataElement {
        let mut coding = MetadataElement::new("flag_coding");
        coding.add_attribute(MetadataAttribute::new("ARITHMETIC", ARITHMETIC_FLAG as i64));
        coding.add_attribute(MetadataAttribute::new("LOW", LOW_FLAG as i64));
        coding.add_attribute(MetadataAttribute::new("HIGH", HIGH_FLAG as i64));
        coding
    }
}

fn factor_parameter(name: &str, label: &str) -> ParameterDefinition {
    ParameterDefinition::new(name, ValueType::Float)
        .with_label(label)
        .with_default(1.0)
        .with_interval(Interval::greater_than(0.0))
        .with_description("Factor applied to the band's samples")
}

impl Operator for NormalizedDifference {
    fn metadata(&self) -> OperatorMetadata {
        Self::describe()
    }

    fn initialize(&mut self) -> ConfigurationResult<RasterProduct> {
        let metadata = Self::describe();
        let alias = metadata.alias.as_str();
        let parameters = metadata.schema.resolve(alias, &self.parameters)?;
        metadata.schema.check_sources(alias, &self.sources)?;
        let config = NormalizedDifferenceConfig::from_parameters(alias, &parameters)?;
        config.validate(alias)?;

        let source = &self.sources["source"];
        let lower = Arc::clone(source.require_band(&config.lower_band)?);
        let upper = Arc::clone(source.require_band(&config.upper_band)?);
        let levels = lower
            .require_source_image()?
            .level_count()
            .min(upper.require_source_image()?.level_count());

        let (width, height) = (source.width(), source.height());
        let mut product = RasterProduct::new(format!("{}_nd", source.name()), "ND", width, height)
            .with_image_to_model(source.image_to_model())
            .with_num_resolutions(levels);
        if let Some((tile_width, tile_height)) = source.preferred_tile_size() {
            product = product.with_preferred_tile_size(tile_width, tile_height);
        }
        product.metadata_mut().add_element(Self::flag_coding());

        product.add_band(
            Band::new(INDEX_BAND, DataType::Float32, width, height)
                .with_description(format!(
                    "({} - {}) / ({} + {})",
                    config.upper_band, config.lower_band, config.upper_band, config.lower_band
                ))
                .with_no_data_value(f64::NAN)
                .with_valid_pixel_expression(format!("{} == 0", FLAGS_BAND)),
        )?;
        product.add_band(
            Band::new(FLAGS_BAND, DataType::UInt8, width, height).with_description("Normalized difference flags"),
        )?;
        product.add_mask("nd_arithmetic", format!("{} & {}", FLAGS_BAND, ARITHMETIC_FLAG))?;
        product.add_mask("nd_low", format!("{} & {}", FLAGS_BAND, LOW_FLAG))?;
        product.add_mask("nd_high", format!("{} & {}", FLAGS_BAND, HIGH_FLAG))?;

        self.state = Some((config, lower, upper));
        Ok(product)
    }
}

impl StackOperator for NormalizedDifference {
    fn compute_tile_stack(
        &self,
        bands: &[Arc<Band>],
        request: &TileRequest,
    ) -> TileGraphResult<IndexMap<String, Raster>> {
        let (config, lower, upper) = self.state.as_ref().ok_or_else(|| {
            TileGraphError::illegal_state("compute tile", "operator 'NormalizedDifference' is not initialized")
        })?;
        let lower_tile = lower.read_tile(request.level, &request.rect)?;
        let upper_tile = upper.read_tile(request.level, &request.rect)?;

        let (width, height) = (request.rect.width, request.rect.height);
        let mut index = Raster::new(width, height, DataType::Float32);
        let mut flags = Raster::new(width, height, DataType::UInt8);
        for y in 0..height {
            for x in 0..width {
                let l = lower_tile.sample(x, y);
                let u = upper_tile.sample(x, y);
                let (value, flag) = if lower.is_no_data(l) || upper.is_no_data(u) {
                    (f64::NAN, ARITHMETIC_FLAG)
                } else {
                    config.compute(l, u)
                };
                index.set_sample(x, y, value);
                flags.set_sample(x, y, flag as f64);
            }
        }

        let mut tiles = IndexMap::new();
        for band in bands {
            match band.name() {
                INDEX_BAND => tiles.insert(INDEX_BAND.to_string(), index.clone()),
                FLAGS_BAND => tiles.insert(FLAGS_BAND.to_string(), flags.clone()),
                other => {
                    return Err(TileGraphError::illegal_state(
                        "compute tile",
                        format!("unexpected target band '{}'", other),
                    ))
                }
            };
        }
        Ok(tiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::operator::OperatorNode;
    use crate::execution::{ExecutionConfig, NullProgressMonitor, OperatorExecutor};

    fn sources() -> SourceProducts {
        let mut product = RasterProduct::new("MER", "MER_RR__1P", 8, 8);
        let red = Raster::from_fn(8, 8, DataType::Float32, |x, _| x as f64);
        let nir = Raster::filled(8, 8, DataType::Float32, 3.0);
        product.add_band(Band::from_raster("red", red, 2).unwrap().with_no_data_value(7.0)).unwrap();
        product.add_band(Band::from_raster("nir", nir, 2).unwrap()).unwrap();
        SourceProducts::from([("source".to_string(), Arc::new(product))])
    }

    #[test]
    fn test_pixel_values_and_flags() {
        let config = NormalizedDifferenceConfig {
            lower_band: "red".to_string(),
            upper_band: "nir".to_string(),
            lower_factor: 1.0,
            upper_factor: 1.0,
        };
        assert_eq!(config.compute(1.0, 3.0), (0.5, 0));
        assert_eq!(config.compute(0.0, 0.0).1, ARITHMETIC_FLAG);
        assert!(config.compute(0.0, 0.0).0.is_nan());
        assert_eq!(config.compute(-3.0, 1.0).1, LOW_FLAG);
        assert_eq!(config.compute(3.0, -1.0).1, HIGH_FLAG);
    }

    #[test]
    fn test_stack_computes_both_bands() {
        let op = NormalizedDifference::new(ParameterSet::new(), sources());
        let mut node = OperatorNode::new(OperatorKind::Stack(Box::new(op)))
            .with_config(ExecutionConfig::default().with_tile_size(4, 4));
        let executor = OperatorExecutor::create(&mut node).unwrap();
        let stats = executor.run(&NullProgressMonitor).unwrap();
        assert_eq!((stats.band_groups, stats.work_items), (1, 4));

        let product = node.target_product().unwrap();
        assert_eq!(product.band_names(), vec![INDEX_BAND, FLAGS_BAND]);
        assert_eq!(product.references_to(FLAGS_BAND).len(), 4);
        assert!(product.metadata().element("flag_coding").is_some());

        let nd = product.band(INDEX_BAND).unwrap().read_level(0).unwrap();
        let flags = product.band(FLAGS_BAND).unwrap().read_level(0).unwrap();
        assert_eq!(nd.sample(1, 0), 0.5);
        assert_eq!(flags.sample(1, 0), 0.0);
        assert!(nd.sample(7, 5).is_nan());
        assert_eq!(flags.sample(7, 5), ARITHMETIC_FLAG as f64);
        assert_eq!(nd.sample(3, 2), 0.0);

        let cache = node.context().unwrap().cache().stats();
        assert_eq!(cache.misses, 4);
    }

    #[test]
    fn test_invalid_configuration() {
        let same = ParameterSet::new().with("nir_band", "red");
        assert!(NormalizedDifference::new(same, sources()).initialize().is_err());

        let negative = ParameterSet::new().with("red_factor", -1.0);
        assert!(NormalizedDifference::new(negative, sources()).initialize().is_err());

        let missing = ParameterSet::new().with("red_band", "b7");
        assert!(matches!(
            NormalizedDifference::new(missing, sources()).initialize(),
            Err(ConfigurationError::UnknownBand { .. })
        ));
    }
}
