//! Model and enum definitions.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use super::{Attribute, AttributeArgument, AttributeValue, Field, IndexAttribute};

/// A model definition; lowered to one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Model name.
    pub name: SmolStr,
    /// Fields in declaration order. Duplicates are representable so that
    /// callers can report them instead of losing one silently.
    #[serde(default)]
    pub fields: Vec<Field>,
    /// Model-level attributes (`@@map`, `@@index`, `@@unique`, `@@id`).
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    /// Documentation comment.
    #[serde(default)]
    pub documentation: Option<String>,
}

impl Model {
    /// Create a new, empty model.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            fields: vec![],
            attributes: vec![],
            documentation: None,
        }
    }

    /// Add a field, builder style.
    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a model-level attribute, builder style.
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Set `@@map("table")`.
    pub fn map(self, table: impl Into<String>) -> Self {
        self.with_attribute(Attribute::new(
            "map",
            vec![AttributeArgument::positional(AttributeValue::String(
                table.into(),
            ))],
        ))
    }

    /// Get the model name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Add a field.
    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// Get the first field with this name.
    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Get the primary key fields (`@id`).
    pub fn id_fields(&self) -> Vec<&Field> {
        self.fields.iter().filter(|f| f.is_id()).collect()
    }

    /// Fields declared in `@@id([...])`, if any.
    pub fn composite_id(&self) -> Option<Vec<SmolStr>> {
        self.get_attribute("id")
            .and_then(|a| a.get_arg("fields").or_else(|| a.first_arg()))
            .and_then(|v| v.as_field_list())
    }

    /// Get relation fields.
    pub fn relation_fields(&self) -> Vec<&Field> {
        self.fields.iter().filter(|f| f.is_relation()).collect()
    }

    /// Fields that are stored as columns.
    pub fn column_fields(&self) -> Vec<&Field> {
        self.fields.iter().filter(|f| f.is_column()).collect()
    }

    /// Check if the model has a specific attribute.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.is(name))
    }

    /// Get a model attribute by name.
    pub fn get_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.is(name))
    }

    /// Get the database table name (from `@@map` or model name).
    pub fn table_name(&self) -> &str {
        self.get_attribute("map")
            .and_then(|a| a.first_arg())
            .and_then(|v| v.as_string())
            .unwrap_or(self.name.as_str())
    }

    /// All `@@index`/`@@unique` declarations.
    pub fn indexes(&self) -> Vec<IndexAttribute> {
        self.attributes
            .iter()
            .filter_map(IndexAttribute::from_attribute)
            .collect()
    }
}

/// An enum definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enum {
    /// Enum name.
    pub name: SmolStr,
    /// Values in declaration order.
    #[serde(default)]
    pub values: Vec<EnumValue>,
    /// Enum-level attributes (`@@map`).
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl Enum {
    /// Create a new enum from value names.
    pub fn new<I, S>(name: impl Into<SmolStr>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        Self {
            name: name.into(),
            values: values.into_iter().map(EnumValue::new).collect(),
            attributes: vec![],
        }
    }

    /// Get the enum name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Get the database type name (from `@@map` or enum name).
    pub fn db_name(&self) -> &str {
        self.attributes
            .iter()
            .find(|a| a.is("map"))
            .and_then(|a| a.first_arg())
            .and_then(|v| v.as_string())
            .unwrap_or(self.name.as_str())
    }

    /// Database values, in declaration order.
    pub fn db_values(&self) -> Vec<&str> {
        self.values.iter().map(EnumValue::db_value).collect()
    }
}

/// A single enum value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    /// Value name.
    pub name: SmolStr,
    /// Value attributes (`@map`).
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl EnumValue {
    /// Create a new enum value.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            attributes: vec![],
        }
    }

    /// Get the value name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Get the database value (from `@map` or name).
    pub fn db_value(&self) -> &str {
        self.attributes
            .iter()
            .find(|a| a.is("map"))
            .and_then(|a| a.first_arg())
            .and_then(|v| v.as_string())
            .unwrap_or(self.name.as_str())
    }
}
