//! Error types for schema loading and validation.

// The fields are read by the derive macros.
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur while loading or validating a schema.
#[derive(Error, Debug, Diagnostic)]
pub enum SchemaError {
    /// Error reading a file.
    #[error("failed to read file: {path}")]
    #[diagnostic(code(reconcile::schema::io_error))]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The schema tree could not be decoded.
    #[error("failed to decode schema: {source}")]
    #[diagnostic(code(reconcile::schema::json_error))]
    Json {
        #[source]
        source: serde_json::Error,
    },

    /// Invalid model definition.
    #[error("invalid model `{name}`: {message}")]
    #[diagnostic(code(reconcile::schema::invalid_model))]
    InvalidModel { name: String, message: String },

    /// Invalid field definition.
    #[error("invalid field `{model}.{field}`: {message}")]
    #[diagnostic(code(reconcile::schema::invalid_field))]
    InvalidField {
        model: String,
        field: String,
        message: String,
    },

    /// Invalid relation definition.
    #[error("invalid relation `{model}.{field}`: {message}")]
    #[diagnostic(code(reconcile::schema::invalid_relation))]
    InvalidRelation {
        model: String,
        field: String,
        message: String,
    },

    /// Duplicate definition.
    #[error("duplicate {kind} `{name}`")]
    #[diagnostic(code(reconcile::schema::duplicate))]
    Duplicate { kind: String, name: String },

    /// Invalid attribute.
    #[error("invalid attribute `@{attribute}` on `{owner}`: {message}")]
    #[diagnostic(code(reconcile::schema::invalid_attribute))]
    InvalidAttribute {
        owner: String,
        attribute: String,
        message: String,
    },

    /// Validation error with multiple issues.
    #[error("schema validation failed with {count} error(s)")]
    #[diagnostic(code(reconcile::schema::validation_failed))]
    ValidationFailed {
        count: usize,
        #[related]
        errors: Vec<SchemaError>,
    },
}

impl SchemaError {
    /// Create an invalid model error.
    pub fn invalid_model(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidModel {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an invalid field error.
    pub fn invalid_field(
        model: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            model: model.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an invalid relation error.
    pub fn invalid_relation(
        model: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidRelation {
            model: model.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a duplicate definition error.
    pub fn duplicate(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Duplicate {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an invalid attribute error.
    pub fn invalid_attribute(
        owner: impl Into<String>,
        attribute: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidAttribute {
            owner: owner.into(),
            attribute: attribute.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchemaError::invalid_field("User", "email", "empty name");
        assert_eq!(err.to_string(), "invalid field `User.email`: empty name");

        let err = SchemaError::duplicate("model", "User");
        assert_eq!(err.to_string(), "duplicate model `User`");

        let err = SchemaError::invalid_attribute("Post", "index", "missing field list");
        assert_eq!(
            err.to_string(),
            "invalid attribute `@index` on `Post`: missing field list"
        );
    }

    #[test]
    fn test_validation_failed_counts() {
        let err = SchemaError::ValidationFailed {
            count: 2,
            errors: vec![
                SchemaError::invalid_model("A", "x"),
                SchemaError::invalid_model("B", "y"),
            ],
        };
        assert!(err.to_string().contains("2 error(s)"));
    }
}
