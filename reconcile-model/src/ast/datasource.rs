//! Datasource declarations.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Database provider named by a datasource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseProvider {
    /// PostgreSQL database.
    PostgreSQL,
    /// MySQL database.
    MySQL,
    /// SQLite database.
    SQLite,
}

impl DatabaseProvider {
    /// Parse a provider from a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Some(Self::PostgreSQL),
            "mysql" => Some(Self::MySQL),
            "sqlite" => Some(Self::SQLite),
            _ => None,
        }
    }

    /// Get the provider as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgresql",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
        }
    }
}

impl std::fmt::Display for DatabaseProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A `datasource` block. Only the provider matters to migrations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datasource {
    /// Datasource name.
    pub name: SmolStr,
    /// Provider as written in the schema.
    pub provider: SmolStr,
    /// Connection URL, if declared.
    #[serde(default)]
    pub url: Option<String>,
}

impl Datasource {
    /// Create a new datasource.
    pub fn new(name: impl Into<SmolStr>, provider: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            url: None,
        }
    }

    /// The parsed provider, if recognized.
    pub fn database_provider(&self) -> Option<DatabaseProvider> {
        DatabaseProvider::from_str(&self.provider)
    }
}
