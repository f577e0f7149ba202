//! Operator parameter and source declarations.
//!
//! Operators declare their configuration surface as a [`ParameterSchema`]:
//! typed parameters with defaults, numeric intervals and value sets, plus the
//! named source products they consume. The schema resolves a user-supplied
//! [`ParameterSet`] during `initialize()`, before any tile work starts.

use crate::core::error::{ConfigurationError, ConfigurationResult};
use crate::core::types::{Value, ValueType};
use crate::product::RasterProduct;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Source products bound to an operator, keyed by source name.
pub type SourceProducts = IndexMap<String, Arc<RasterProduct>>;

// ============================================================================
// Interval
// ============================================================================

/// Numeric interval in `[min,max]` notation.
///
/// Round brackets exclude the bound, `*` leaves a side unbounded:
/// `(1,*]` accepts every value greater than one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// Lower bound, `None` when unbounded
    pub min: Option<f64>,
    /// Upper bound, `None` when unbounded
    pub max: Option<f64>,
    /// Whether the lower bound itself is accepted
    pub min_inclusive: bool,
    /// Whether the upper bound itself is accepted
    pub max_inclusive: bool,
}

impl Interval {
    /// `[min, max]`
    pub fn closed(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            min_inclusive: true,
            max_inclusive: true,
        }
    }

    /// `[min, *]`
    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
            min_inclusive: true,
            max_inclusive: true,
        }
    }

    /// `(min, *]`
    pub fn greater_than(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
            min_inclusive: false,
            max_inclusive: true,
        }
    }

    /// Parse interval notation such as `(1,*]` or `[0, 1)`.
    pub fn parse(text: &str) -> ConfigurationResult<Self> {
        let invalid = || ConfigurationError::InvalidInterval(text.to_string());
        let trimmed = text.trim();
        let min_inclusive = match trimmed.chars().next() {
            Some('[') => true,
            Some('(') => false,
            _ => return Err(invalid()),
        };
        let max_inclusive = match trimmed.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(invalid()),
        };
        let inner = &trimmed[1..trimmed.len() - 1];
        let (low, high) = inner.split_once(',').ok_or_else(invalid)?;
        let bound = |part: &str| -> ConfigurationResult<Option<f64>> {
            match part.trim() {
                "*" => Ok(None),
                number => number.parse::<f64>().map(Some).map_err(|_| invalid()),
            }
        };
        let interval = Self {
            min: bound(low)?,
            max: bound(high)?,
            min_inclusive,
            max_inclusive,
        };
        if let (Some(min), Some(max)) = (interval.min, interval.max) {
            if min > max {
                return Err(invalid());
            }
        }
        Ok(interval)
    }

    /// Check whether a value lies inside the interval.
    pub fn contains(&self, value: f64) -> bool {
        let above = match self.min {
            Some(min) if self.min_inclusive => value >= min,
            Some(min) => value > min,
            None => true,
        };
        let below = match self.max {
            Some(max) if self.max_inclusive => value <= max,
            Some(max) => value < max,
            None => true,
        };
        above && below
    }
}

impl FromStr for Interval {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::parse(s)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = |b: Option<f64>| b.map_or_else(|| "*".to_string(), |v| v.to_string());
        write!(
            f,
            "{}{},{}{}",
            if self.min_inclusive { '[' } else { '(' },
            bound(self.min),
            bound(self.max),
            if self.max_inclusive { ']' } else { ')' }
        )
    }
}

// ============================================================================
// Parameter and source definitions
// ============================================================================

/// Definition of an operator parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDefinition {
    /// Unique name within the operator
    pub name: String,
    /// Human-readable label
    pub label: String,
    /// Declared value type
    pub value_type: ValueType,
    /// Value used when none is supplied
    pub default_value: Option<Value>,
    /// Description for documentation
    pub description: String,
    /// Physical unit of the value, if any
    pub unit: Option<String>,
    /// Accepted numeric range
    pub interval: Option<Interval>,
    /// Accepted values; empty means unrestricted
    pub value_set: Vec<Value>,
    /// Whether a value (given or default) is required
    pub not_null: bool,
}

impl ParameterDefinition {
    /// Create a new parameter definition.
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        let name = name.into();
        Self {
            label: name_to_label(&name),
            name,
            value_type,
            default_value: None,
            description: String::new(),
            unit: None,
            interval: None,
            value_set: Vec::new(),
            not_null: false,
        }
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Restrict numeric values to an interval.
    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Restrict values to a fixed set.
    pub fn with_value_set(mut self, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        self.value_set = values.into_iter().map(Into::into).collect();
        self
    }

    /// Require a value.
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Validate a value against this parameter's type, interval and value set.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        if !self.value_type.matches(value) {
            return Err(format!(
                "expected {}, got {}",
                self.value_type,
                value.get_type()
            ));
        }
        if let (Some(interval), Some(number)) = (self.interval, value.as_float()) {
            if !interval.contains(number) {
                return Err(format!("value {} is outside {}", number, interval));
            }
        }
        if !self.value_set.is_empty() && !self.value_set.contains(value) {
            let allowed: Vec<String> = self.value_set.iter().map(|v| v.to_string()).collect();
            return Err(format!(
                "value {} is not one of [{}]",
                value,
                allowed.join(", ")
            ));
        }
        Ok(())
    }
}

/// Declaration of a named source product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDefinition {
    /// Source name used for binding
    pub name: String,
    /// Description for documentation
    pub description: String,
    /// Whether the operator can run without this source
    pub optional: bool,
}

impl SourceDefinition {
    /// Create a required source definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            optional: false,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark this source as optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// The configuration surface of an operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Declared parameters, in declaration order
    pub parameters: Vec<ParameterDefinition>,
    /// Declared sources, in declaration order
    pub sources: Vec<SourceDefinition>,
}

impl ParameterSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter.
    pub fn parameter(mut self, parameter: ParameterDefinition) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Add a source.
    pub fn source(mut self, source: SourceDefinition) -> Self {
        self.sources.push(source);
        self
    }

    /// Find a parameter by name.
    pub fn get_parameter(&self, name: &str) -> Option<&ParameterDefinition> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Resolve supplied values against the schema.
    ///
    /// Unknown names and invalid values are rejected; missing values fall
    /// back to defaults. The returned set holds every declared parameter that
    /// has a value, in declaration order.
    pub fn resolve(&self, operator: &str, supplied: &ParameterSet) -> ConfigurationResult<ParameterSet> {
        for name in supplied.names() {
            if self.get_parameter(name).is_none() {
                return Err(ConfigurationError::InvalidParameter {
                    operator: operator.to_string(),
                    parameter: name.to_string(),
                    error: "unknown parameter".to_string(),
                });
            }
        }

        let mut resolved = ParameterSet::new();
        for definition in &self.parameters {
            let value = supplied
                .get(&definition.name)
                .filter(|v| !v.is_none())
                .or(definition.default_value.as_ref());
            match value {
                Some(value) => {
                    definition
                        .validate(value)
                        .map_err(|error| ConfigurationError::InvalidParameter {
                            operator: operator.to_string(),
                            parameter: definition.name.clone(),
                            error,
                        })?;
                    resolved.insert(definition.name.clone(), value.clone());
                }
                None if definition.not_null => {
                    return Err(ConfigurationError::MissingParameter {
                        operator: operator.to_string(),
                        parameter: definition.name.clone(),
                    });
                }
                None => {}
            }
        }
        Ok(resolved)
    }

    /// Check that every required source is bound.
    pub fn check_sources(&self, operator: &str, sources: &SourceProducts) -> ConfigurationResult<()> {
        for definition in self.sources.iter().filter(|s| !s.optional) {
            if !sources.contains_key(&definition.name) {
                return Err(ConfigurationError::MissingSource {
                    operator: operator.to_string(),
                    source_name: definition.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Convert snake_case name to a Title Case label.
fn name_to_label(name: &str) -> String {
    name.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Parameter values
// ============================================================================

/// Named parameter values, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    values: IndexMap<String, Value>,
}

impl ParameterSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert a value, replacing any previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Get a value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Check whether a value is present.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Parameter names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Iterate over all values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse a `name=value` assignment, inferring the value type.
    pub fn parse_assignment(text: &str) -> ConfigurationResult<(String, Value)> {
        let (name, value) = text
            .split_once('=')
            .ok_or_else(|| ConfigurationError::Other(format!("Expected name=value, got '{}'", text)))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigurationError::Other(format!("Missing parameter name in '{}'", text)));
        }
        Ok((name.to_string(), Value::parse_inferred(value)))
    }

    /// Build a set from a JSON object.
    pub fn from_json(json: &serde_json::Value) -> ConfigurationResult<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| ConfigurationError::Other("Parameters must be a JSON object".to_string()))?;
        Ok(Self {
            values: object
                .iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v)))
                .collect(),
        })
    }

    /// Get a required float parameter.
    pub fn require_float(&self, operator: &str, name: &str) -> ConfigurationResult<f64> {
        self.require(operator, name, Value::as_float)
    }

    /// Get a required integer parameter.
    pub fn require_integer(&self, operator: &str, name: &str) -> ConfigurationResult<i64> {
        self.require(operator, name, Value::as_integer)
    }

    /// Get a required boolean parameter.
    pub fn require_bool(&self, operator: &str, name: &str) -> ConfigurationResult<bool> {
        self.require(operator, name, Value::as_bool)
    }

    /// Get a required string parameter.
    pub fn require_string(&self, operator: &str, name: &str) -> ConfigurationResult<String> {
        self.require(operator, name, |v| v.as_string().map(str::to_string))
    }

    /// Get an optional string parameter.
    pub fn optional_string(&self, name: &str) -> Option<String> {
        self.get(name).and_then(Value::as_string).map(str::to_string)
    }

    /// Get an optional float parameter.
    pub fn optional_float(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_float)
    }

    fn require<T>(&self, operator: &str, name: &str, read: impl Fn(&Value) -> Option<T>) -> ConfigurationResult<T> {
        let value = self.get(name).ok_or_else(|| ConfigurationError::MissingParameter {
            operator: operator.to_string(),
            parameter: name.to_string(),
        })?;
        read(value).ok_or_else(|| ConfigurationError::InvalidParameter {
            operator: operator.to_string(),
            parameter: name.to_string(),
            error: format!("unexpected {} value {}", value.get_type(), value),
        })
    }
}

impl FromIterator<(String, Value)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ParameterSchema {
        ParameterSchema::new()
            .parameter(
                ParameterDefinition::new("tree_count", ValueType::Integer)
                    .with_default(10)
                    .with_interval(Interval::parse("(1,*]").unwrap()),
            )
            .parameter(
                ParameterDefinition::new("mode", ValueType::String)
                    .with_default("fast")
                    .with_value_set(["fast", "exact"]),
            )
            .parameter(ParameterDefinition::new("target", ValueType::String).not_null())
            .source(SourceDefinition::new("source"))
            .source(SourceDefinition::new("mask").optional())
    }

    #[test]
    fn test_interval_parse() {
        let interval = Interval::parse("(1,*]").unwrap();
        assert!(!interval.contains(1.0));
        assert!(interval.contains(1.5));
        assert!(interval.contains(1e9));
        assert_eq!(interval.to_string(), "(1,*]");

        let closed: Interval = "[0, 1)".parse().unwrap();
        assert!(closed.contains(0.0));
        assert!(!closed.contains(1.0));

        assert!(Interval::parse("1,2").is_err());
        assert!(Interval::parse("[2,1]").is_err());
        assert!(Interval::parse("[a,1]").is_err());
    }

    #[test]
    fn test_resolve_applies_defaults() {
        let resolved = schema()
            .resolve("Classifier", &ParameterSet::new().with("target", "label"))
            .unwrap();
        assert_eq!(resolved.get("tree_count"), Some(&Value::Integer(10)));
        assert_eq!(resolved.get("mode"), Some(&Value::from("fast")));
        assert_eq!(resolved.names().collect::<Vec<_>>(), vec!["tree_count", "mode", "target"]);
    }

    #[test]
    fn test_resolve_rejects_invalid_values() {
        let schema = schema();
        let out_of_range = ParameterSet::new().with("target", "x").with("tree_count", 1);
        assert!(matches!(
            schema.resolve("Classifier", &out_of_range),
            Err(ConfigurationError::InvalidParameter { parameter, .. }) if parameter == "tree_count"
        ));

        let not_in_set = ParameterSet::new().with("target", "x").with("mode", "slow");
        assert!(schema.resolve("Classifier", &not_in_set).is_err());

        let unknown = ParameterSet::new().with("target", "x").with("depth", 3);
        assert!(schema.resolve("Classifier", &unknown).is_err());

        assert!(matches!(
            schema.resolve("Classifier", &ParameterSet::new()),
            Err(ConfigurationError::MissingParameter { parameter, .. }) if parameter == "target"
        ));
    }

    #[test]
    fn test_check_sources() {
        let schema = schema();
        let err = schema.check_sources("Classifier", &SourceProducts::new()).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingSource { source_name, .. } if source_name == "source"));

        let mut sources = SourceProducts::new();
        sources.insert("source".to_string(), Arc::new(RasterProduct::new("p", "type", 4, 4)));
        assert!(schema.check_sources("Classifier", &sources).is_ok());
    }

    #[test]
    fn test_parse_assignment() {
        let (name, value) = ParameterSet::parse_assignment("factor = 2.5").unwrap();
        assert_eq!(name, "factor");
        assert_eq!(value, Value::Float(2.5));
        assert!(ParameterSet::parse_assignment("factor").is_err());
        assert!(ParameterSet::parse_assignment("=1").is_err());
    }

    #[test]
    fn test_typed_getters() {
        let params = ParameterSet::from_json(&serde_json::json!({"factor": 2, "name": "x"})).unwrap();
        assert_eq!(params.require_float("Op", "factor").unwrap(), 2.0);
        assert_eq!(params.require_string("Op", "name").unwrap(), "x");
        assert!(params.require_bool("Op", "name").is_err());
        assert!(params.require_integer("Op", "missing").is_err());
        assert_eq!(ParameterDefinition::new("no_data_value", ValueType::Float).label, "No Data Value");
    }
}
