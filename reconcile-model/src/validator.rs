//! Semantic validation of a parsed schema.
//!
//! Rejects trees that cannot be lowered to DDL at all:
//! - empty or duplicate model/enum names
//! - enum fields pointing at undeclared enums
//! - malformed `@relation`, `@@index`, `@@unique` and `@@id` arguments
//! - models without a single stored column
//!
//! Structural concerns a migration can still proceed with (reserved table
//! names, duplicate columns, relations to missing models, relation cycles)
//! are left to the differ, which reports them as warnings.

use std::collections::HashSet;

use crate::ast::*;
use crate::error::{SchemaError, SchemaResult};

/// Schema validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<SchemaError>,
}

impl Validator {
    /// Create a new validator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a schema, collecting every problem before failing.
    pub fn validate(&mut self, schema: &Schema) -> SchemaResult<()> {
        self.errors.clear();

        self.check_duplicates(schema);

        for model in &schema.models {
            self.validate_model(model, schema);
        }

        for e in &schema.enums {
            self.validate_enum(e);
        }

        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::ValidationFailed {
                count: self.errors.len(),
                errors: std::mem::take(&mut self.errors),
            })
        }
    }

    fn check_duplicates(&mut self, schema: &Schema) {
        let mut seen = HashSet::new();

        for model in &schema.models {
            if !seen.insert(model.name()) {
                self.errors.push(SchemaError::duplicate("model", model.name()));
            }
        }

        for e in &schema.enums {
            if !seen.insert(e.name()) {
                self.errors.push(SchemaError::duplicate("enum", e.name()));
            }
        }
    }

    fn validate_model(&mut self, model: &Model, schema: &Schema) {
        if model.name().trim().is_empty() {
            self.errors
                .push(SchemaError::invalid_model("", "model name must not be empty"));
            return;
        }

        if model.column_fields().is_empty() {
            self.errors.push(SchemaError::invalid_model(
                model.name(),
                "model must declare at least one scalar or enum field",
            ));
        }

        for field in &model.fields {
            self.validate_field(field, model, schema);
        }

        for attr in &model.attributes {
            self.validate_model_attribute(attr, model);
        }
    }

    fn validate_field(&mut self, field: &Field, model: &Model, schema: &Schema) {
        if field.name().trim().is_empty() {
            self.errors.push(SchemaError::invalid_field(
                model.name(),
                "",
                "field name must not be empty",
            ));
            return;
        }

        if let FieldType::Enum(name) = &field.field_type {
            if schema.get_enum(name).is_none() {
                self.errors.push(SchemaError::invalid_field(
                    model.name(),
                    field.name(),
                    format!("unknown enum `{name}`"),
                ));
            }
        }

        if field.is_relation() && field.has_attribute("default") {
            self.errors.push(SchemaError::invalid_field(
                model.name(),
                field.name(),
                "relation fields cannot have a default value",
            ));
        }

        if let Some(attr) = field.get_attribute("relation") {
            self.validate_relation(attr, field, model);
        }
    }

    fn validate_relation(&mut self, attr: &Attribute, field: &Field, model: &Model) {
        let rel = RelationAttribute::from_attribute(attr);

        if rel.fields.len() != rel.references.len() {
            self.errors.push(SchemaError::invalid_relation(
                model.name(),
                field.name(),
                format!(
                    "`fields` has {} entries but `references` has {}",
                    rel.fields.len(),
                    rel.references.len()
                ),
            ));
        }

        for name in &rel.fields {
            if model.get_field(name).is_none() {
                self.errors.push(SchemaError::invalid_relation(
                    model.name(),
                    field.name(),
                    format!("unknown field `{name}` in `fields`"),
                ));
            }
        }

        for (arg, parsed) in [("onDelete", rel.on_delete), ("onUpdate", rel.on_update)] {
            if attr.get_arg(arg).is_some() && parsed.is_none() {
                self.errors.push(SchemaError::invalid_relation(
                    model.name(),
                    field.name(),
                    format!("unrecognized referential action for `{arg}`"),
                ));
            }
        }
    }

    fn validate_model_attribute(&mut self, attr: &Attribute, model: &Model) {
        let fields = match attr.name() {
            "index" | "unique" => match IndexAttribute::from_attribute(attr) {
                Some(index) => index.fields,
                None => {
                    self.errors.push(SchemaError::invalid_attribute(
                        model.name(),
                        attr.name(),
                        "expected a list of fields",
                    ));
                    return;
                }
            },
            "id" => match model.composite_id() {
                Some(fields) => fields,
                None => {
                    self.errors.push(SchemaError::invalid_attribute(
                        model.name(),
                        attr.name(),
                        "expected a list of fields",
                    ));
                    return;
                }
            },
            _ => return,
        };

        if fields.is_empty() {
            self.errors.push(SchemaError::invalid_attribute(
                model.name(),
                attr.name(),
                "field list must not be empty",
            ));
        }

        for name in fields {
            if model.get_field(&name).is_none() {
                self.errors.push(SchemaError::invalid_attribute(
                    model.name(),
                    attr.name(),
                    format!("unknown field `{name}`"),
                ));
            }
        }
    }

    fn validate_enum(&mut self, e: &Enum) {
        if e.values.is_empty() {
            self.errors.push(SchemaError::invalid_model(
                e.name(),
                "enum must declare at least one value",
            ));
        }

        let mut seen = HashSet::new();
        for value in &e.values {
            if !seen.insert(value.db_value()) {
                self.errors
                    .push(SchemaError::duplicate("enum value", format!("{}.{}", e.name(), value.name())));
            }
        }
    }
}

/// Validate a schema with a fresh [`Validator`].
pub fn validate_schema(schema: &Schema) -> SchemaResult<()> {
    Validator::new().validate(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(name: &str) -> Field {
        Field::new(name, FieldType::Scalar(ScalarType::Int), TypeModifier::Required)
    }

    fn relation(fields: &[&str], references: &[&str]) -> Attribute {
        Attribute::new(
            "relation",
            vec![
                AttributeArgument::named(
                    "fields",
                    AttributeValue::FieldRefList(fields.iter().map(|f| (*f).into()).collect()),
                ),
                AttributeArgument::named(
                    "references",
                    AttributeValue::FieldRefList(references.iter().map(|f| (*f).into()).collect()),
                ),
            ],
        )
    }

    fn error_count(result: SchemaResult<()>) -> usize {
        match result {
            Err(SchemaError::ValidationFailed { count, .. }) => count,
            Err(other) => panic!("unexpected error: {other}"),
            Ok(()) => 0,
        }
    }

    #[test]
    fn test_valid_schema() {
        let schema = Schema::new()
            .with_model(Model::new("User").with_field(int("id").id()))
            .with_model(
                Model::new("Post")
                    .with_field(int("id").id())
                    .with_field(int("authorId"))
                    .with_field(
                        Field::new("author", FieldType::Model("User".into()), TypeModifier::Required)
                            .with_attribute(relation(&["authorId"], &["id"])),
                    ),
            );
        assert!(validate_schema(&schema).is_ok());
    }

    #[test]
    fn test_duplicate_model() {
        let schema = Schema::new()
            .with_model(Model::new("User").with_field(int("id")))
            .with_model(Model::new("User").with_field(int("id")));
        assert_eq!(error_count(validate_schema(&schema)), 1);
    }

    #[test]
    fn test_relation_to_missing_model_is_not_a_validation_error() {
        let schema = Schema::new().with_model(
            Model::new("Post")
                .with_field(int("id"))
                .with_field(Field::new("ghost", FieldType::Model("Ghost".into()), TypeModifier::Optional)),
        );
        assert!(validate_schema(&schema).is_ok());
    }

    #[test]
    fn test_relation_argument_mismatch() {
        let schema = Schema::new().with_model(
            Model::new("Post").with_field(int("id")).with_field(
                Field::new("author", FieldType::Model("User".into()), TypeModifier::Required)
                    .with_attribute(relation(&["authorId", "x"], &["id"])),
            ),
        );
        // length mismatch plus two unknown local fields
        assert_eq!(error_count(validate_schema(&schema)), 3);
    }

    #[test]
    fn test_unknown_enum_and_empty_model() {
        let schema = Schema::new()
            .with_model(Model::new("Empty"))
            .with_model(Model::new("User").with_field(Field::new(
                "role",
                FieldType::Enum("Role".into()),
                TypeModifier::Required,
            )));
        assert_eq!(error_count(validate_schema(&schema)), 2);
    }

    #[test]
    fn test_index_attribute_validation() {
        let schema = Schema::new().with_model(
            Model::new("User")
                .with_field(int("id"))
                .with_attribute(Attribute::simple("index"))
                .with_attribute(Attribute::new(
                    "unique",
                    vec![AttributeArgument::positional(AttributeValue::FieldRefList(vec![
                        "missing".into(),
                    ]))],
                )),
        );
        assert_eq!(error_count(validate_schema(&schema)), 2);
    }

    #[test]
    fn test_enum_validation() {
        let schema = Schema::new()
            .with_model(Model::new("User").with_field(int("id")))
            .with_enum(Enum::new("Role", ["A", "A"]))
            .with_enum(Enum::new("Empty", Vec::<&str>::new()));
        assert_eq!(error_count(validate_schema(&schema)), 2);
    }
}
