//! The root of a parsed schema.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{DatabaseProvider, Datasource, Enum, Model};
use crate::error::{SchemaError, SchemaResult};

/// A complete, already-parsed schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Datasource declarations.
    #[serde(default)]
    pub datasources: Vec<Datasource>,
    /// Models in declaration order.
    #[serde(default)]
    pub models: Vec<Model>,
    /// Enums in declaration order.
    #[serde(default)]
    pub enums: Vec<Enum>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a datasource, builder style.
    pub fn with_datasource(mut self, datasource: Datasource) -> Self {
        self.datasources.push(datasource);
        self
    }

    /// Add a model, builder style.
    pub fn with_model(mut self, model: Model) -> Self {
        self.models.push(model);
        self
    }

    /// Add an enum, builder style.
    pub fn with_enum(mut self, e: Enum) -> Self {
        self.enums.push(e);
        self
    }

    /// Add a model.
    pub fn add_model(&mut self, model: Model) {
        self.models.push(model);
    }

    /// Add an enum.
    pub fn add_enum(&mut self, e: Enum) {
        self.enums.push(e);
    }

    /// Get a model by name.
    pub fn get_model(&self, name: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.name() == name)
    }

    /// Get an enum by name.
    pub fn get_enum(&self, name: &str) -> Option<&Enum> {
        self.enums.iter().find(|e| e.name() == name)
    }

    /// Model names in declaration order.
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|m| m.name())
    }

    /// Provider of the first datasource, if any is declared and recognized.
    pub fn provider(&self) -> Option<DatabaseProvider> {
        self.datasources.first().and_then(|d| d.database_provider())
    }

    /// Load a schema tree from its JSON form.
    pub fn from_json_str(content: &str) -> SchemaResult<Self> {
        serde_json::from_str(content).map_err(|source| SchemaError::Json { source })
    }

    /// Load a schema tree from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> SchemaResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SchemaError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Serialize the schema tree as pretty JSON.
    pub fn to_json(&self) -> SchemaResult<String> {
        serde_json::to_string_pretty(self).map_err(|source| SchemaError::Json { source })
    }
}
