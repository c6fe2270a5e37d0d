//! Field types and modifiers.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Scalar types a field can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    /// Integer type (maps to INT/INTEGER).
    Int,
    /// Big integer type (maps to BIGINT).
    BigInt,
    /// Floating point type (maps to REAL/DOUBLE).
    Float,
    /// Decimal type (maps to DECIMAL/NUMERIC).
    Decimal,
    /// String type (maps to TEXT/VARCHAR).
    String,
    /// Boolean type.
    Boolean,
    /// Date and time type.
    DateTime,
    /// Date only type.
    Date,
    /// Time only type.
    Time,
    /// JSON type.
    Json,
    /// Binary data.
    Bytes,
    /// UUID type.
    Uuid,
}

impl ScalarType {
    /// Parse a scalar type from its schema spelling.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Int" => Some(Self::Int),
            "BigInt" => Some(Self::BigInt),
            "Float" => Some(Self::Float),
            "Decimal" => Some(Self::Decimal),
            "String" => Some(Self::String),
            "Boolean" | "Bool" => Some(Self::Boolean),
            "DateTime" => Some(Self::DateTime),
            "Date" => Some(Self::Date),
            "Time" => Some(Self::Time),
            "Json" => Some(Self::Json),
            "Bytes" => Some(Self::Bytes),
            "Uuid" | "UUID" => Some(Self::Uuid),
            _ => None,
        }
    }

    /// Get the type name as written in a schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "Int",
            Self::BigInt => "BigInt",
            Self::Float => "Float",
            Self::Decimal => "Decimal",
            Self::String => "String",
            Self::Boolean => "Boolean",
            Self::DateTime => "DateTime",
            Self::Date => "Date",
            Self::Time => "Time",
            Self::Json => "Json",
            Self::Bytes => "Bytes",
            Self::Uuid => "Uuid",
        }
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The type of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// A scalar type (Int, String, etc.).
    Scalar(ScalarType),
    /// A reference to an enum declared in the schema.
    Enum(SmolStr),
    /// A reference to another model (relation).
    Model(SmolStr),
    /// A type the parser could not resolve. Never lowered to a column.
    Unsupported(SmolStr),
}

impl FieldType {
    /// Check if this is a scalar type.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    /// Check if this is a relation to another model.
    pub fn is_relation(&self) -> bool {
        matches!(self, Self::Model(_))
    }

    /// Check if this is an enum type.
    pub fn is_enum(&self) -> bool {
        matches!(self, Self::Enum(_))
    }

    /// Get the type name as a string.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Scalar(s) => s.as_str(),
            Self::Enum(name) | Self::Model(name) | Self::Unsupported(name) => name.as_str(),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Modifier for field types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeModifier {
    /// Required field (no modifier).
    #[default]
    Required,
    /// Optional field (`?` suffix).
    Optional,
    /// List field (`[]` suffix).
    List,
    /// Optional list field (`[]?` suffix).
    OptionalList,
}

impl TypeModifier {
    /// Check if the field is optional.
    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Optional | Self::OptionalList)
    }

    /// Check if the field is a list.
    pub fn is_list(&self) -> bool {
        matches!(self, Self::List | Self::OptionalList)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_type_round_trip_names() {
        assert_eq!(ScalarType::from_str("Bool"), Some(ScalarType::Boolean));
        assert_eq!(ScalarType::from_str("UUID"), Some(ScalarType::Uuid));
        assert_eq!(ScalarType::from_str("Text"), None);
        assert_eq!(ScalarType::DateTime.as_str(), "DateTime");
    }

    #[test]
    fn test_field_type_predicates() {
        let rel = FieldType::Model("User".into());
        assert!(rel.is_relation());
        assert!(!rel.is_scalar());
        assert_eq!(rel.type_name(), "User");
        assert!(FieldType::Enum("Role".into()).is_enum());
        assert_eq!(FieldType::Scalar(ScalarType::Int).to_string(), "Int");
    }

    #[test]
    fn test_type_modifier() {
        assert!(TypeModifier::Optional.is_optional());
        assert!(TypeModifier::OptionalList.is_list());
        assert!(TypeModifier::OptionalList.is_optional());
        assert!(!TypeModifier::Required.is_list());
        assert_eq!(TypeModifier::default(), TypeModifier::Required);
    }
}
