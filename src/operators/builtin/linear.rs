//! Linear band transformation.

use crate::core::error::{ConfigurationError, ConfigurationResult, TileGraphError, TileGraphResult};
use crate::core::operator::{Operator, OperatorKind, OperatorMetadata, PerTileOperator, TileRequest};
use crate::core::parameter::{Interval, ParameterDefinition, ParameterSet, SourceDefinition, SourceProducts};
use crate::core::raster::Raster;
use crate::core::types::{DataType, ValueType};
use crate::operators::registry::OperatorRegistry;
use crate::product::{Band, RasterProduct};
use std::str::FromStr;
use std::sync::Arc;

/// Register the linear transform operator.
pub fn register(registry: &mut OperatorRegistry) {
    registry.register_fn(LinearTransform::describe(), |config| {
        Ok(OperatorKind::PerTile(Box::new(LinearTransform::new(config.parameters, config.sources))))
    });
}

/// Validated configuration of [`LinearTransform`].
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConfig {
    pub source_band: String,
    pub target_band: String,
    pub factor: f64,
    pub offset: f64,
    pub no_data_value: f64,
    pub data_type: DataType,
}

impl LinearConfig {
    fn from_parameters(operator: &str, parameters: &ParameterSet) -> ConfigurationResult<Self> {
        let data_type = parameters.require_string(operator, "data_type")?;
        Ok(Self {
            source_band: parameters.require_string(operator, "source_band")?,
            target_band: parameters.require_string(operator, "target_band")?,
            factor: parameters.require_float(operator, "factor")?,
            offset: parameters.require_float(operator, "offset")?,
            no_data_value: parameters.require_float(operator, "no_data_value")?,
            data_type: DataType::from_str(&data_type).map_err(|e| ConfigurationError::InvalidParameter {
                operator: operator.to_string(),
                parameter: "data_type".to_string(),
                error: e.to_string(),
            })?,
        })
    }

    fn validate(&self, operator: &str) -> ConfigurationResult<()> {
        if !self.factor.is_finite() || self.factor == 0.0 {
            return Err(ConfigurationError::InvalidParameter {
                operator: operator.to_string(),
                parameter: "factor".to_string(),
                error: format!("factor must be finite and non-zero, got {}", self.factor),
            });
        }
        if self.target_band.trim().is_empty() {
            return Err(ConfigurationError::InvalidParameter {
                operator: operator.to_string(),
                parameter: "target_band".to_string(),
                error: "target band name is empty".to_string(),
            });
        }
        Ok(())
    }

    /// Transformed value of one sample, given whether the source sample is no-data.
    pub fn apply(&self, value: f64, is_no_data: bool) -> f64 {
        if is_no_data {
            self.no_data_value
        } else {
            value * self.factor + self.offset
        }
    }
}

/// Computes `source * factor + offset` into a new band, honouring no-data.
pub struct LinearTransform {
    parameters: ParameterSet,
    sources: SourceProducts,
    state: Option<(LinearConfig, Arc<Band>)>,
}

impl LinearTransform {
    pub fn new(parameters: ParameterSet, sources: SourceProducts) -> Self {
        Self {
            parameters,
            sources,
            state: None,
        }
    }

    /// Operator metadata, available without an instance.
    pub fn describe() -> OperatorMetadata {
        OperatorMetadata::builder("LinearTransform")
            .category("Raster/Band Maths")
            .description("Scales and offsets a source band: target = source * factor + offset")
            .authors("tilegraph")
            .version("1.0")
            .parameter(
                ParameterDefinition::new("source_band", ValueType::String)
                    .with_description("Name of the band to transform")
                    .not_null(),
            )
            .parameter(
                ParameterDefinition::new("target_band", ValueType::String)
                    .with_default("linear")
                    .with_description("Name of the computed band"),
            )
            .parameter(
                ParameterDefinition::new("factor", ValueType::Float)
                    .with_default(1.0)
                    .with_description("Scaling factor"),
            )
            .parameter(
                ParameterDefinition::new("offset", ValueType::Float)
                    .with_default(0.0)
                    .with_description("Offset added after scaling"),
            )
            .parameter(
                ParameterDefinition::new("no_data_value", ValueType::Float)
                    .with_default(f64::NAN)
                    .with_label("No-Data Value")
                    .with_description("Value written where the source sample is no-data"),
            )
            .parameter(
                ParameterDefinition::new("data_type", ValueType::String)
                    .with_default("float32")
                    .with_value_set(["int16", "int32", "float32", "float64"])
                    .with_description("Sample type of the computed band"),
            )
            .parameter(
                ParameterDefinition::new("resolutions", ValueType::Integer)
                    .with_interval(Interval::closed(1.0, 16.0))
                    .with_description("Number of resolution levels, at most those of the source band"),
            )
            .source(SourceDefinition::new("source"))
            .build()
    }
}

impl Operator for LinearTransform {
    fn metadata(&self) -> OperatorMetadata {
        Self::describe()
    }

    fn initialize(&mut self) -> ConfigurationResult<RasterProduct> {
        let metadata = Self::describe();
        let alias = metadata.alias.as_str();
        let parameters = metadata.schema.resolve(alias, &self.parameters)?;
        metadata.schema.check_sources(alias, &self.sources)?;
        let config = LinearConfig::from_parameters(alias, &parameters)?;
        config.validate(alias)?;

        let source = &self.sources["source"];
        let band = Arc::clone(source.require_band(&config.source_band)?);
        let source_levels = band.require_source_image()?.level_count();

        let mut product = RasterProduct::new(
            format!("{}_linear", source.name()),
            source.product_type(),
            source.width(),
            source.height(),
        )
        .with_image_to_model(source.image_to_model());
        if let Some((width, height)) = source.preferred_tile_size() {
            product = product.with_preferred_tile_size(width, height);
        }
        let levels = parameters
            .get("resolutions")
            .and_then(|v| v.as_integer())
            .map_or(source_levels, |levels| (levels as usize).min(source_levels));
        product = product.with_num_resolutions(levels);

        let mut target = Band::new(&config.target_band, config.data_type, source.width(), source.height())
            .with_description(format!(
                "{} * {} + {}",
                config.source_band, config.factor, config.offset
            ))
            .with_no_data_value(config.no_data_value);
        if let Some(unit) = band.unit() {
            target = target.with_unit(unit);
        }
        product.add_band(target)?;

        log::debug!(
            "LinearTransform: {} = {} * {} + {}",
            config.target_band,
            config.source_band,
            config.factor,
            config.offset
        );
        self.state = Some((config, band));
        Ok(product)
    }
}

impl PerTileOperator for LinearTransform {
    fn compute_tile(&self, band: &Band, request: &TileRequest) -> TileGraphResult<Raster> {
        let (config, source) = self
            .state
            .as_ref()
            .ok_or_else(|| TileGraphError::illegal_state("compute tile", "operator 'LinearTransform' is not initialized"))?;
        let tile = source.read_tile(request.level, &request.rect)?;
        Ok(tile.map(band.data_type(), |v| config.apply(v, source.is_no_data(v))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::operator::OperatorNode;
    use crate::core::types::Value;

    fn sources() -> SourceProducts {
        let mut product = RasterProduct::new("L1", "TEST", 6, 4);
        let raster = Raster::from_fn(6, 4, DataType::Int16, |x, _| if x == 0 { -1.0 } else { x as f64 });
        product
            .add_band(Band::from_raster("dn", raster, 1).unwrap().with_no_data_value(-1.0))
            .unwrap();
        SourceProducts::from([("source".to_string(), Arc::new(product))])
    }

    #[test]
    fn test_scale_and_offset() {
        let parameters = ParameterSet::new()
            .with("source_band", "dn")
            .with("factor", 0.5)
            .with("offset", 10)
            .with("no_data_value", -999.0);
        let op = LinearTransform::new(parameters, sources());
        let mut node = OperatorNode::new(OperatorKind::PerTile(Box::new(op)));
        let product = node.initialize().unwrap();
        assert_eq!(product.name(), "L1_linear");

        let band = product.band("linear").unwrap();
        assert_eq!(band.data_type(), DataType::Float32);
        let level = band.read_level(0).unwrap();
        assert_eq!(level.sample(0, 2), -999.0);
        assert_eq!(level.sample(4, 1), 12.0);
    }

    #[test]
    fn test_default_no_data_is_nan() {
        let parameters = ParameterSet::new().with("source_band", "dn").with("data_type", "float64");
        let mut node = OperatorNode::new(OperatorKind::PerTile(Box::new(LinearTransform::new(parameters, sources()))));
        let band = Arc::clone(node.initialize().unwrap().band("linear").unwrap());
        let level = band.read_level(0).unwrap();
        assert!(level.sample(0, 0).is_nan());
        assert!(band.is_no_data(level.sample(0, 0)));
        assert_eq!(level.sample(5, 3), 5.0);
    }

    #[test]
    fn test_invalid_parameters() {
        let cases = [
            ParameterSet::new(),
            ParameterSet::new().with("source_band", "dn").with("factor", 0.0),
            ParameterSet::new().with("source_band", "dn").with("data_type", "uint8"),
            ParameterSet::new().with("source_band", "dn").with("resolutions", 0),
            ParameterSet::new().with("source_band", "dn").with("scale", 2.0),
            ParameterSet::new().with("source_band", "radiance"),
        ];
        for parameters in cases {
            let mut op = LinearTransform::new(parameters.clone(), sources());
            assert!(op.initialize().is_err(), "{:?} must be rejected", parameters);
        }

        let mut op = LinearTransform::new(
            ParameterSet::new().with("source_band", Value::from("dn")),
            SourceProducts::new(),
        );
        assert!(matches!(op.initialize(), Err(ConfigurationError::MissingSource { .. })));
    }
}
