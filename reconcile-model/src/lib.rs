//! # reconcile-model
//!
//! The target side of a migration: an already-parsed schema tree.
//!
//! The tree is a closed set of tagged types ([`Schema`], [`Model`], [`Field`],
//! [`Attribute`], [`AttributeArgument`], [`Enum`], [`Datasource`]) so that every
//! consumer matches exhaustively instead of probing shapes. Typed views over
//! the attributes the migration engine cares about (`@relation`, `@@index`,
//! `@@unique`, `@@id`, `@default`, `@map`, `@@map`) live next to the raw
//! attribute types.
//!
//! Parsing schema text is someone else's job. Trees arrive either constructed
//! in code or decoded from their JSON form:
//!
//! ```rust
//! use reconcile_model::{Field, FieldType, Model, ScalarType, Schema, TypeModifier};
//!
//! let schema = Schema::new().with_model(
//!     Model::new("Post")
//!         .with_field(Field::new("id", FieldType::Scalar(ScalarType::Int), TypeModifier::Required).id())
//!         .with_field(Field::new("title", FieldType::Scalar(ScalarType::String), TypeModifier::Required)),
//! );
//!
//! reconcile_model::validate_schema(&schema).unwrap();
//! ```

pub mod ast;
pub mod error;
pub mod validator;

pub use ast::*;
pub use error::{SchemaError, SchemaResult};
pub use validator::{Validator, validate_schema};
