//! Operator registry for managing available operator types.

use crate::core::error::{ConfigurationError, ConfigurationResult};
use crate::core::operator::{OperatorKind, OperatorMetadata};
use crate::core::parameter::{ParameterSet, SourceProducts};
use crate::core::types::Value;
use crate::product::RasterProduct;
use indexmap::IndexMap;
use std::sync::Arc;

/// Parameters and source products handed to an operator factory.
#[derive(Debug, Clone, Default)]
pub struct OperatorConfig {
    pub parameters: ParameterSet,
    pub sources: SourceProducts,
}

impl OperatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter value.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name, value);
        self
    }

    /// Replace all parameters.
    pub fn with_parameters(mut self, parameters: ParameterSet) -> Self {
        self.parameters = parameters;
        self
    }

    /// Bind a source product.
    pub fn with_source(mut self, name: impl Into<String>, product: Arc<RasterProduct>) -> Self {
        self.sources.insert(name.into(), product);
        self
    }
}

/// Service provider creating instances of one operator type.
pub trait OperatorSpi: Send + Sync {
    /// Metadata and parameter schema of the operator type.
    fn metadata(&self) -> OperatorMetadata;

    /// Create an uninitialized operator.
    fn create(&self, config: OperatorConfig) -> ConfigurationResult<OperatorKind>;
}

/// Factory function for creating operator instances.
pub type OperatorFactory = Arc<dyn Fn(OperatorConfig) -> ConfigurationResult<OperatorKind> + Send + Sync>;

/// Provider built from metadata and a factory function.
pub struct FnOperatorSpi {
    metadata: OperatorMetadata,
    factory: OperatorFactory,
}

impl FnOperatorSpi {
    pub fn new<F>(metadata: OperatorMetadata, factory: F) -> Self
    where
        F: Fn(OperatorConfig) -> ConfigurationResult<OperatorKind> + Send + Sync + 'static,
    {
        Self {
            metadata,
            factory: Arc::new(factory),
        }
    }
}

impl OperatorSpi for FnOperatorSpi {
    fn metadata(&self) -> OperatorMetadata {
        self.metadata.clone()
    }

    fn create(&self, config: OperatorConfig) -> ConfigurationResult<OperatorKind> {
        (self.factory)(config)
    }
}

/// Registry entry containing metadata and provider.
#[derive(Clone)]
pub struct RegistryEntry {
    /// Provider creating instances.
    pub spi: Arc<dyn OperatorSpi>,
    /// Cached metadata.
    pub metadata: OperatorMetadata,
    /// Whether this operator is enabled.
    pub enabled: bool,
}

/// Registry of all available operator types, keyed by alias.
///
/// Built explicitly at startup; there is no runtime discovery.
pub struct OperatorRegistry {
    operators: IndexMap<String, RegistryEntry>,
    /// Aliases grouped by top-level category.
    categories: IndexMap<String, Vec<String>>,
}

impl OperatorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            operators: IndexMap::new(),
            categories: IndexMap::new(),
        }
    }

    /// Create a registry pre-populated with built-in operators.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::operators::builtin::register_all(&mut registry);
        registry
    }

    /// Register an operator provider. A provider with the same alias is replaced.
    pub fn register(&mut self, spi: impl OperatorSpi + 'static) {
        let metadata = spi.metadata();
        let alias = metadata.alias.clone();
        if self.unregister(&alias) {
            log::warn!("Replacing registered operator '{}'", alias);
        }
        let category = top_category(&metadata);

        self.operators.insert(
            alias.clone(),
            RegistryEntry {
                spi: Arc::new(spi),
                metadata,
                enabled: true,
            },
        );
        self.categories.entry(category).or_default().push(alias);
    }

    /// Register an operator from metadata and a factory function.
    pub fn register_fn<F>(&mut self, metadata: OperatorMetadata, factory: F)
    where
        F: Fn(OperatorConfig) -> ConfigurationResult<OperatorKind> + Send + Sync + 'static,
    {
        self.register(FnOperatorSpi::new(metadata, factory));
    }

    /// Create a new instance of an operator by alias.
    pub fn create(&self, alias: &str, config: OperatorConfig) -> ConfigurationResult<OperatorKind> {
        let entry = self
            .operators
            .get(alias)
            .filter(|e| e.enabled)
            .ok_or_else(|| ConfigurationError::UnknownOperator(alias.to_string()))?;
        log::debug!(
            "Creating operator '{}' with {} parameters and {} sources",
            alias,
            config.parameters.len(),
            config.sources.len()
        );
        entry.spi.create(config)
    }

    /// Get metadata for an operator without creating an instance.
    pub fn get_metadata(&self, alias: &str) -> Option<&OperatorMetadata> {
        self.operators.get(alias).map(|e| &e.metadata)
    }

    /// Get a registry entry.
    pub fn get_entry(&self, alias: &str) -> Option<&RegistryEntry> {
        self.operators.get(alias)
    }

    /// Check if an operator is registered.
    pub fn contains(&self, alias: &str) -> bool {
        self.operators.contains_key(alias)
    }

    /// Registered aliases in registration order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.operators.keys().map(|s| s.as_str())
    }

    /// Aliases registered under a top-level category.
    pub fn operators_by_category(&self, category: &str) -> Vec<&str> {
        self.categories
            .get(category)
            .map(|aliases| aliases.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default()
    }

    /// Top-level categories.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(|s| s.as_str())
    }

    /// Search operators by alias, category or description.
    pub fn search(&self, query: &str) -> Vec<&str> {
        let query = query.to_lowercase();
        self.operators
            .iter()
            .filter(|(_, entry)| {
                let metadata = &entry.metadata;
                metadata.alias.to_lowercase().contains(&query)
                    || metadata.category.to_lowercase().contains(&query)
                    || metadata.description.to_lowercase().contains(&query)
            })
            .map(|(alias, _)| alias.as_str())
            .collect()
    }

    /// Enable or disable an operator.
    pub fn set_enabled(&mut self, alias: &str, enabled: bool) -> bool {
        if let Some(entry) = self.operators.get_mut(alias) {
            entry.enabled = enabled;
            true
        } else {
            false
        }
    }

    /// Unregister an operator.
    pub fn unregister(&mut self, alias: &str) -> bool {
        if let Some(entry) = self.operators.shift_remove(alias) {
            let category = top_category(&entry.metadata);
            if let Some(aliases) = self.categories.get_mut(&category) {
                aliases.retain(|a| a != alias);
                if aliases.is_empty() {
                    self.categories.shift_remove(&category);
                }
            }
            true
        } else {
            false
        }
    }

    /// Get the total number of registered operators.
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Get count of enabled operators.
    pub fn enabled_count(&self) -> usize {
        self.operators.values().filter(|e| e.enabled).count()
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn top_category(metadata: &OperatorMetadata) -> String {
    metadata
        .category_path()
        .first()
        .map_or_else(|| metadata.category.clone(), |c| c.to_string())
}

/// Builder for creating a customized registry.
pub struct RegistryBuilder {
    registry: OperatorRegistry,
    include_builtins: bool,
}

impl RegistryBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            registry: OperatorRegistry::new(),
            include_builtins: true,
        }
    }

    /// Include or exclude built-in operators.
    pub fn with_builtins(mut self, include: bool) -> Self {
        self.include_builtins = include;
        self
    }

    /// Register a custom operator.
    pub fn register(mut self, spi: impl OperatorSpi + 'static) -> Self {
        self.registry.register(spi);
        self
    }

    /// Build the registry. Custom operators win over built-ins of the same alias.
    pub fn build(self) -> OperatorRegistry {
        if !self.include_builtins {
            return self.registry;
        }
        let mut registry = OperatorRegistry::with_builtins();
        for (_, entry) in self.registry.operators {
            registry.register(ArcSpi(entry.spi));
        }
        registry
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct ArcSpi(Arc<dyn OperatorSpi>);

impl OperatorSpi for ArcSpi {
    fn metadata(&self) -> OperatorMetadata {
        self.0.metadata()
    }

    fn create(&self, config: OperatorConfig) -> ConfigurationResult<OperatorKind> {
        self.0.create(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::TileGraphResult;
    use crate::core::operator::{Operator, PerTileOperator, TileRequest};
    use crate::core::raster::Raster;
    use crate::product::Band;

    struct Constant;

    impl Operator for Constant {
        fn metadata(&self) -> OperatorMetadata {
            constant_metadata()
        }

        fn initialize(&mut self) -> ConfigurationResult<RasterProduct> {
            Ok(RasterProduct::new("constant", "test", 1, 1))
        }
    }

    impl PerTileOperator for Constant {
        fn compute_tile(&self, band: &Band, request: &TileRequest) -> TileGraphResult<Raster> {
            Ok(Raster::filled(request.rect.width, request.rect.height, band.data_type(), 1.0))
        }
    }

    fn constant_metadata() -> OperatorMetadata {
        OperatorMetadata::builder("Constant")
            .category("Testing/Generators")
            .description("Fills bands with a constant")
            .build()
    }

    fn registry() -> OperatorRegistry {
        let mut registry = OperatorRegistry::new();
        registry.register_fn(constant_metadata(), |_| Ok(OperatorKind::PerTile(Box::new(Constant))));
        registry
    }

    #[test]
    fn test_register_and_create() {
        let registry = registry();
        assert!(registry.contains("Constant"));
        assert_eq!(registry.len(), 1);
        assert!(registry.create("Constant", OperatorConfig::new()).is_ok());
        assert!(matches!(
            registry.create("Missing", OperatorConfig::new()),
            Err(ConfigurationError::UnknownOperator(_))
        ));
    }

    #[test]
    fn test_category_index_and_search() {
        let registry = registry();
        assert_eq!(registry.operators_by_category("Testing"), vec!["Constant"]);
        assert_eq!(registry.categories().collect::<Vec<_>>(), vec!["Testing"]);
        assert_eq!(registry.search("constant"), vec!["Constant"]);
        assert_eq!(registry.search("generators"), vec!["Constant"]);
        assert!(registry.search("nonexistent").is_empty());
    }

    #[test]
    fn test_enable_disable() {
        let mut registry = registry();
        assert!(registry.set_enabled("Constant", false));
        assert_eq!(registry.enabled_count(), 0);
        assert!(registry.create("Constant", OperatorConfig::new()).is_err());
        assert!(registry.get_metadata("Constant").is_some());

        registry.set_enabled("Constant", true);
        assert!(registry.create("Constant", OperatorConfig::new()).is_ok());
        assert!(!registry.set_enabled("Missing", true));
    }

    #[test]
    fn test_unregister() {
        let mut registry = registry();
        assert!(registry.unregister("Constant"));
        assert!(!registry.contains("Constant"));
        assert_eq!(registry.categories().count(), 0);
        assert!(!registry.unregister("Constant"));
    }

    #[test]
    fn test_builder() {
        let registry = RegistryBuilder::new()
            .with_builtins(false)
            .register(FnOperatorSpi::new(constant_metadata(), |_| {
                Ok(OperatorKind::PerTile(Box::new(Constant)))
            }))
            .build();
        assert_eq!(registry.aliases().collect::<Vec<_>>(), vec!["Constant"]);

        let registry = RegistryBuilder::new()
            .register(FnOperatorSpi::new(constant_metadata(), |_| {
                Ok(OperatorKind::PerTile(Box::new(Constant)))
            }))
            .build();
        assert!(registry.contains("Copy"));
        assert!(registry.contains("Constant"));
    }
}
