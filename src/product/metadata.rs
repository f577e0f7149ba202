//! Product metadata tree.
//!
//! Metadata is a tree of named elements holding named attributes. Trees can
//! be built from JSON documents such as catalogue item descriptions.

use crate::core::types::Value;
use serde::{Deserialize, Serialize};

/// Name of the root element holding metadata imported from a source document.
pub const ORIGINAL_PRODUCT_METADATA: &str = "Original_Product_Metadata";

/// Name used for array members.
pub const ARRAY_MEMBER: &str = "element";

/// A named metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataAttribute {
    pub name: String,
    pub value: Value,
    pub unit: Option<String>,
}

impl MetadataAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// A node of the metadata tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataElement {
    pub name: String,
    pub description: String,
    elements: Vec<MetadataElement>,
    attributes: Vec<MetadataAttribute>,
}

impl MetadataElement {
    /// Create an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build an element tree from a JSON object.
    ///
    /// Nested objects become child elements and scalars become attributes.
    /// An array becomes a child element holding its scalar members as
    /// `element` attributes; object members of an array are added as
    /// `element` children of the enclosing element.
    pub fn from_json(name: impl Into<String>, json: &serde_json::Value) -> Self {
        let mut root = Self::new(name);
        if let serde_json::Value::Object(object) = json {
            root.fill_from_json(object);
        }
        root
    }

    fn fill_from_json(&mut self, object: &serde_json::Map<String, serde_json::Value>) {
        for (key, value) in object {
            match value {
                serde_json::Value::Object(nested) => {
                    let mut child = MetadataElement::new(key.as_str());
                    child.fill_from_json(nested);
                    self.add_element(child);
                }
                serde_json::Value::Array(items) => {
                    let mut array = MetadataElement::new(key.as_str());
                    let mut members = Vec::new();
                    for item in items {
                        match item {
                            serde_json::Value::Object(nested) => {
                                let mut member = MetadataElement::new(ARRAY_MEMBER);
                                member.fill_from_json(nested);
                                members.push(member);
                            }
                            scalar => array.add_attribute(MetadataAttribute::new(ARRAY_MEMBER, Value::from_json(scalar))),
                        }
                    }
                    self.add_element(array);
                    for member in members {
                        self.add_element(member);
                    }
                }
                scalar => self.set_attribute(key.as_str(), Value::from_json(scalar)),
            }
        }
    }

    /// Append a child element.
    pub fn add_element(&mut self, element: MetadataElement) {
        self.elements.push(element);
    }

    /// Append an attribute, keeping existing ones of the same name.
    pub fn add_attribute(&mut self, attribute: MetadataAttribute) {
        self.attributes.push(attribute);
    }

    /// Set an attribute, replacing the first one of the same name.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.value = value,
            None => self.attributes.push(MetadataAttribute::new(name, value)),
        }
    }

    /// Child elements in insertion order.
    pub fn elements(&self) -> &[MetadataElement] {
        &self.elements
    }

    /// Attributes in insertion order.
    pub fn attributes(&self) -> &[MetadataAttribute] {
        &self.attributes
    }

    /// First child element with the given name.
    pub fn element(&self, name: &str) -> Option<&MetadataElement> {
        self.elements.iter().find(|e| e.name == name)
    }

    /// First attribute with the given name.
    pub fn attribute(&self, name: &str) -> Option<&MetadataAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Value of the first attribute with the given name.
    pub fn attribute_value(&self, name: &str) -> Option<&Value> {
        self.attribute(name).map(|a| &a.value)
    }

    /// Descend along a `/`-separated element path.
    pub fn element_at(&self, path: &str) -> Option<&MetadataElement> {
        path.split('/')
            .filter(|part| !part.is_empty())
            .try_fold(self, |element, part| element.element(part))
    }

    /// Remove the first child element with the given name.
    pub fn remove_element(&mut self, name: &str) -> Option<MetadataElement> {
        let index = self.elements.iter().position(|e| e.name == name)?;
        Some(self.elements.remove(index))
    }
}
