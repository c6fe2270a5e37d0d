//! Abstract syntax tree of an already-parsed schema.

mod attribute;
mod datasource;
mod field;
mod model;
mod schema;
mod types;

pub use attribute::*;
pub use datasource::*;
pub use field::*;
pub use model::*;
pub use schema::*;
pub use types::*;
