//! Field definitions.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use super::{
    Attribute, AttributeArgument, AttributeValue, FieldAttributes, FieldType, RelationAttribute,
    TypeModifier,
};

/// A field in a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Field name.
    pub name: SmolStr,
    /// Field type.
    pub field_type: FieldType,
    /// Type modifier (optional, list, etc.).
    #[serde(default)]
    pub modifier: TypeModifier,
    /// Field attributes.
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    /// Documentation comment.
    #[serde(default)]
    pub documentation: Option<String>,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<SmolStr>, field_type: FieldType, modifier: TypeModifier) -> Self {
        Self {
            name: name.into(),
            field_type,
            modifier,
            attributes: vec![],
            documentation: None,
        }
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Mark the field as `@id`.
    pub fn id(self) -> Self {
        self.with_attribute(Attribute::simple("id"))
    }

    /// Mark the field as `@unique`.
    pub fn unique(self) -> Self {
        self.with_attribute(Attribute::simple("unique"))
    }

    /// Attach `@default(value)`.
    pub fn default_value(self, value: AttributeValue) -> Self {
        self.with_attribute(Attribute::new(
            "default",
            vec![AttributeArgument::positional(value)],
        ))
    }

    /// Attach `@map("column")`.
    pub fn map(self, column: impl Into<String>) -> Self {
        self.with_attribute(Attribute::new(
            "map",
            vec![AttributeArgument::positional(AttributeValue::String(
                column.into(),
            ))],
        ))
    }

    /// Get the field name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Check if the field is optional.
    pub fn is_optional(&self) -> bool {
        self.modifier.is_optional()
    }

    /// Check if the field is a list.
    pub fn is_list(&self) -> bool {
        self.modifier.is_list()
    }

    /// Check if the field has a specific attribute.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.is(name))
    }

    /// Get an attribute by name.
    pub fn get_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.is(name))
    }

    /// Check if this field is a primary key.
    pub fn is_id(&self) -> bool {
        self.has_attribute("id")
    }

    /// Check if this field has a unique constraint.
    pub fn is_unique(&self) -> bool {
        self.has_attribute("unique")
    }

    /// Check if this field is a relation.
    pub fn is_relation(&self) -> bool {
        self.field_type.is_relation() || self.has_attribute("relation")
    }

    /// The `@default` value, if any.
    pub fn default(&self) -> Option<&AttributeValue> {
        self.get_attribute("default").and_then(|a| a.first_arg())
    }

    /// The `@relation` details, if any.
    pub fn relation(&self) -> Option<RelationAttribute> {
        self.get_attribute("relation")
            .map(RelationAttribute::from_attribute)
    }

    /// Database column name, honoring `@map`.
    pub fn column_name(&self) -> &str {
        self.get_attribute("map")
            .and_then(|a| a.first_arg())
            .and_then(|v| v.as_string())
            .unwrap_or(self.name.as_str())
    }

    /// Whether the field is stored as a column at all.
    ///
    /// Relation fields and unresolved types live only in the model.
    pub fn is_column(&self) -> bool {
        matches!(self.field_type, FieldType::Scalar(_) | FieldType::Enum(_))
    }

    /// Extract structured field attributes.
    pub fn extract_attributes(&self) -> FieldAttributes {
        let mut attrs = FieldAttributes::default();

        for attr in &self.attributes {
            match attr.name() {
                "id" => attrs.is_id = true,
                "unique" => attrs.is_unique = true,
                "default" => attrs.default = attr.first_arg().cloned(),
                "map" => {
                    attrs.map = attr
                        .first_arg()
                        .and_then(|v| v.as_string())
                        .map(String::from);
                }
                "relation" => attrs.relation = Some(RelationAttribute::from_attribute(attr)),
                _ => {}
            }
        }

        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ScalarType;

    fn make_field(name: &str, ty: FieldType, modifier: TypeModifier) -> Field {
        Field::new(name, ty, modifier)
    }

    #[test]
    fn test_field_flags() {
        let field = make_field("id", FieldType::Scalar(ScalarType::Int), TypeModifier::Required)
            .id()
            .default_value(AttributeValue::Function("autoincrement".into(), vec![]));

        assert!(field.is_id());
        assert!(!field.is_optional());
        assert!(!field.is_unique());
        assert!(field.is_column());
        assert!(matches!(
            field.default(),
            Some(AttributeValue::Function(name, _)) if name == "autoincrement"
        ));
    }

    #[test]
    fn test_relation_fields_are_not_columns() {
        let posts = make_field("posts", FieldType::Model("Post".into()), TypeModifier::List);
        assert!(posts.is_relation());
        assert!(posts.is_list());
        assert!(!posts.is_column());

        let unknown = make_field("geo", FieldType::Unsupported("Point".into()), TypeModifier::Required);
        assert!(!unknown.is_column());
    }

    #[test]
    fn test_column_name_honors_map() {
        let field = make_field("createdAt", FieldType::Scalar(ScalarType::DateTime), TypeModifier::Required)
            .map("created_at");
        assert_eq!(field.name(), "createdAt");
        assert_eq!(field.column_name(), "created_at");
    }

    #[test]
    fn test_extract_attributes() {
        let field = make_field("email", FieldType::Scalar(ScalarType::String), TypeModifier::Optional)
            .unique()
            .map("email_address")
            .default_value(AttributeValue::String("none".into()));

        let attrs = field.extract_attributes();
        assert!(attrs.is_unique);
        assert!(!attrs.is_id);
        assert_eq!(attrs.map.as_deref(), Some("email_address"));
        assert_eq!(attrs.default, Some(AttributeValue::String("none".into())));
        assert!(attrs.relation.is_none());
    }
}
