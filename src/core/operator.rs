//! Operator traits and operator metadata.
//!
//! An operator consumes source bands and produces the bands of exactly one
//! target product. Operators come in two shapes:
//!
//! 1. **Per-tile** ([`PerTileOperator`]): each target band is computed on its
//!    own, one tile at a time.
//! 2. **Stack** ([`StackOperator`]): all computed target bands share one
//!    per-tile computation and are produced together.
//!
//! The executor never inspects concrete operator types; it dispatches on the
//! [`OperatorKind`] tag.

use crate::core::error::{ConfigurationResult, OperatorId, TileGraphError, TileGraphResult};
use crate::core::parameter::{ParameterDefinition, ParameterSchema, SourceDefinition};
use crate::core::raster::{Raster, Rectangle, TileIndex};
use crate::execution::config::ExecutionConfig;
use crate::execution::context::{OperatorContext, TileLayout};
use crate::product::{Band, RasterProduct};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Metadata describing an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorMetadata {
    /// Stable identifier used for registration (e.g. "LinearTransform")
    pub alias: String,
    /// `/`-separated category path (e.g. "Raster/Band Maths")
    pub category: String,
    /// Detailed description
    pub description: String,
    /// Authors
    pub authors: String,
    /// Version string
    pub version: String,
    /// Copyright notice
    pub copyright: String,
    /// Parameters and sources
    pub schema: ParameterSchema,
}

impl OperatorMetadata {
    /// Create a new metadata builder.
    pub fn builder(alias: impl Into<String>) -> OperatorMetadataBuilder {
        OperatorMetadataBuilder::new(alias)
    }

    /// Category path split into its components.
    pub fn category_path(&self) -> Vec<&str> {
        self.category
            .split('/')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect()
    }
}

/// Builder for OperatorMetadata.
pub struct OperatorMetadataBuilder {
    metadata: OperatorMetadata,
}

impl OperatorMetadataBuilder {
    /// Create a new builder with required fields.
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            metadata: OperatorMetadata {
                alias: alias.into(),
                category: "Raster".to_string(),
                description: String::new(),
                authors: String::new(),
                version: "1.0".to_string(),
                copyright: String::new(),
                schema: ParameterSchema::new(),
            },
        }
    }

    /// Set the category path.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.metadata.category = category.into();
        self
    }

    /// Set the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = description.into();
        self
    }

    /// Set the authors.
    pub fn authors(mut self, authors: impl Into<String>) -> Self {
        self.metadata.authors = authors.into();
        self
    }

    /// Set the version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.metadata.version = version.into();
        self
    }

    /// Set the copyright notice.
    pub fn copyright(mut self, copyright: impl Into<String>) -> Self {
        self.metadata.copyright = copyright.into();
        self
    }

    /// Add a parameter.
    pub fn parameter(mut self, parameter: ParameterDefinition) -> Self {
        self.metadata.schema.parameters.push(parameter);
        self
    }

    /// Add a source.
    pub fn source(mut self, source: SourceDefinition) -> Self {
        self.metadata.schema.sources.push(source);
        self
    }

    /// Build the metadata.
    pub fn build(self) -> OperatorMetadata {
        self.metadata
    }
}

/// The tile an operator is asked to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRequest {
    /// Tile index within the level's grid.
    pub tile: TileIndex,
    /// Resolution level.
    pub level: usize,
    /// Pixel region of the tile, clipped to the level bounds.
    pub rect: Rectangle,
}

/// Common operator behaviour.
///
/// # Thread Safety
///
/// Tile methods are called concurrently for distinct tiles, hence `Send + Sync`.
pub trait Operator: Send + Sync {
    /// Get the metadata for this operator.
    fn metadata(&self) -> OperatorMetadata;

    /// Validate the configuration and create the target product.
    ///
    /// Called exactly once, before any tile is computed. Target bands
    /// without a source image are computed by this operator; bands that
    /// already carry one are passed through.
    fn initialize(&mut self) -> ConfigurationResult<RasterProduct>;
}

/// Operator computing each target band independently.
pub trait PerTileOperator: Operator {
    /// Compute one tile of one target band.
    fn compute_tile(&self, band: &Band, request: &TileRequest) -> TileGraphResult<Raster>;
}

/// Operator computing all of its target bands jointly.
pub trait StackOperator: Operator {
    /// Compute one tile of every band in `bands`, keyed by band name.
    fn compute_tile_stack(
        &self,
        bands: &[Arc<Band>],
        request: &TileRequest,
    ) -> TileGraphResult<IndexMap<String, Raster>>;
}

/// An operator tagged with its computation shape.
pub enum OperatorKind {
    PerTile(Box<dyn PerTileOperator>),
    Stack(Box<dyn StackOperator>),
}

impl OperatorKind {
    /// Get the metadata of the wrapped operator.
    pub fn metadata(&self) -> OperatorMetadata {
        match self {
            OperatorKind::PerTile(op) => op.metadata(),
            OperatorKind::Stack(op) => op.metadata(),
        }
    }

    /// Whether target bands are computed jointly.
    pub fn is_stack(&self) -> bool {
        matches!(self, OperatorKind::Stack(_))
    }

    /// Initialize the wrapped operator.
    pub fn initialize(&mut self) -> ConfigurationResult<RasterProduct> {
        match self {
            OperatorKind::PerTile(op) => op.initialize(),
            OperatorKind::Stack(op) => op.initialize(),
        }
    }
}

impl fmt::Debug for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = if self.is_stack() { "Stack" } else { "PerTile" };
        f.debug_tuple(shape).field(&self.metadata().alias).finish()
    }
}

/// Lifecycle of an operator node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorState {
    Created,
    Initialized,
}

/// An operator instance inside a processing graph.
///
/// The node owns the operator until `initialize()` succeeds, then hands it to
/// an [`OperatorContext`] that serves its tiles. A failed initialization
/// keeps the node in [`OperatorState::Created`].
pub struct OperatorNode {
    id: OperatorId,
    alias: String,
    pending: Option<OperatorKind>,
    context: Option<Arc<OperatorContext>>,
    config: ExecutionConfig,
}

impl OperatorNode {
    /// Wrap an operator.
    pub fn new(operator: OperatorKind) -> Self {
        Self {
            id: OperatorId::new(),
            alias: operator.metadata().alias,
            pending: Some(operator),
            context: None,
            config: ExecutionConfig::default(),
        }
    }

    /// Set the execution config used for tiling and caching.
    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id(&self) -> OperatorId {
        self.id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn state(&self) -> OperatorState {
        if self.context.is_some() {
            OperatorState::Initialized
        } else {
            OperatorState::Created
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    /// Initialize the operator and return its target product.
    ///
    /// Calling this again after success returns the same product.
    pub fn initialize(&mut self) -> TileGraphResult<Arc<RasterProduct>> {
        if let Some(context) = &self.context {
            return Ok(Arc::clone(context.target_product()));
        }
        let mut operator = self.pending.take().ok_or_else(|| {
            TileGraphError::illegal_state("initialize", format!("operator '{}' is no longer available", self.alias))
        })?;

        let prepared = operator
            .initialize()
            .and_then(|product| TileLayout::new(&product, &self.config).map(|layout| (product, layout)));
        let (product, layout) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                log::warn!("Operator '{}' ({}) failed to initialize: {}", self.alias, self.id, e);
                self.pending = Some(operator);
                return Err(e.into());
            }
        };

        let context = OperatorContext::new(operator, product, layout, &self.config);
        log::info!(
            "Initialized operator '{}' ({}): {} target bands, {}x{} tiles of {}x{}",
            self.alias,
            self.id,
            context.target_product().band_count(),
            context.layout().base_grid().columns(),
            context.layout().base_grid().rows(),
            context.layout().tile_width(),
            context.layout().tile_height()
        );
        let product = Arc::clone(context.target_product());
        self.context = Some(context);
        Ok(product)
    }

    /// The target product. Fails before initialization.
    pub fn target_product(&self) -> TileGraphResult<Arc<RasterProduct>> {
        Ok(Arc::clone(self.context()?.target_product()))
    }

    /// The tile-serving context. Fails before initialization.
    pub fn context(&self) -> TileGraphResult<&Arc<OperatorContext>> {
        self.context.as_ref().ok_or_else(|| {
            TileGraphError::illegal_state(
                "access target product",
                format!("operator '{}' is not initialized", self.alias),
            )
        })
    }
}

impl fmt::Debug for OperatorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorNode")
            .field("id", &self.id)
            .field("alias", &self.alias)
            .field("state", &self.state())
            .finish()
    }
}
