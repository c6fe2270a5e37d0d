//! Engine configuration, loadable from a `[migrate]`-style TOML document.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::diff::RiskLevel;
use crate::error::{MigrateResult, MigrationError};

/// Default history table name.
pub const DEFAULT_HISTORY_TABLE: &str = "_reconcile_migrations";

/// Default lock table name.
pub const DEFAULT_LOCK_TABLE: &str = "_reconcile_migration_locks";

/// Configuration for the migration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationConfig {
    /// Run all statements of one migration inside a single transaction.
    #[serde(default = "default_true")]
    pub use_transaction: bool,

    /// How long a lock row stays live, in milliseconds.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    /// Lock key shared by apply and rollback.
    #[serde(default = "default_lock_scope")]
    pub lock_scope: String,

    /// Name of the history table.
    #[serde(default = "default_history_table")]
    pub history_table: String,

    /// Name of the lock table.
    #[serde(default = "default_lock_table")]
    pub lock_table: String,

    /// Record best-effort runs that finished with errors.
    #[serde(default = "default_true")]
    pub record_failed_migrations: bool,

    /// Confirmation gate settings.
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Logging switches for the default observer.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            use_transaction: true,
            lock_timeout_ms: default_lock_timeout(),
            lock_scope: default_lock_scope(),
            history_table: default_history_table(),
            lock_table: default_lock_table(),
            record_failed_migrations: true,
            prompt: PromptConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrationError::config(format!("failed to read {}: {}", path.display(), e))
        })?;

        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string, expanding `${VAR}` references.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> MigrateResult<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| MigrationError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot work with.
    pub fn validate(&self) -> MigrateResult<()> {
        if self.lock_timeout_ms == 0 {
            return Err(MigrationError::config("lock_timeout_ms must be positive"));
        }
        for (key, value) in [
            ("history_table", &self.history_table),
            ("lock_table", &self.lock_table),
            ("lock_scope", &self.lock_scope),
        ] {
            if value.trim().is_empty() {
                return Err(MigrationError::config(format!("{key} must not be empty")));
            }
        }
        if self.history_table == self.lock_table {
            return Err(MigrationError::config(
                "history_table and lock_table must differ",
            ));
        }
        Ok(())
    }

    /// Set transactional execution.
    pub fn use_transaction(mut self, enabled: bool) -> Self {
        self.use_transaction = enabled;
        self
    }

    /// Set the lock timeout.
    pub fn lock_timeout_ms(mut self, ms: u64) -> Self {
        self.lock_timeout_ms = ms;
        self
    }

    /// Set the lock scope key.
    pub fn lock_scope(mut self, scope: impl Into<String>) -> Self {
        self.lock_scope = scope.into();
        self
    }

    /// Set the history table name.
    pub fn history_table(mut self, name: impl Into<String>) -> Self {
        self.history_table = name.into();
        self
    }

    /// Set the lock table name.
    pub fn lock_table(mut self, name: impl Into<String>) -> Self {
        self.lock_table = name.into();
        self
    }

    /// Set whether failed best-effort runs are recorded.
    pub fn record_failed_migrations(mut self, enabled: bool) -> Self {
        self.record_failed_migrations = enabled;
        self
    }

    /// Set the confirmation gate settings.
    pub fn prompt(mut self, prompt: PromptConfig) -> Self {
        self.prompt = prompt;
        self
    }

    /// Set the logging switches.
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Tables the introspector must never report.
    pub fn bookkeeping_tables(&self) -> [&str; 2] {
        [self.history_table.as_str(), self.lock_table.as_str()]
    }
}

/// When and how `apply_with_confirmation` asks for approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptConfig {
    /// Whether the gate is active at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lowest risk level that triggers the gate.
    #[serde(default = "default_minimum_risk")]
    pub minimum_risk_level: RiskLevel,

    /// Include the detailed summary in the preview handed to the confirmer.
    #[serde(default = "default_true")]
    pub show_detailed_summary: bool,

    /// High-risk migrations need an explicit yes from the confirmer.
    #[serde(default = "default_true")]
    pub require_explicit_confirmation: bool,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            minimum_risk_level: default_minimum_risk(),
            show_detailed_summary: true,
            require_explicit_confirmation: true,
        }
    }
}

/// Switches for the default tracing observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log each statement before it runs.
    #[serde(default = "default_true")]
    pub log_statements: bool,

    /// Log each completed step.
    #[serde(default)]
    pub log_progress: bool,

    /// Include execution times in the completion record.
    #[serde(default = "default_true")]
    pub log_execution_times: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_statements: true,
            log_progress: false,
            log_execution_times: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_lock_timeout() -> u64 {
    30_000
}

fn default_lock_scope() -> String {
    "schema".to_string()
}

fn default_history_table() -> String {
    DEFAULT_HISTORY_TABLE.to_string()
}

fn default_lock_table() -> String {
    DEFAULT_LOCK_TABLE.to_string()
}

fn default_minimum_risk() -> RiskLevel {
    RiskLevel::Medium
}

/// Replace `${VAR}` with the variable's value; unknown variables are left as-is.
fn expand_env_vars(content: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return content.to_string();
    };

    re.replace_all(content, |caps: &regex_lite::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_default() {
        let config = MigrationConfig::default();
        assert!(config.use_transaction);
        assert_eq!(config.lock_timeout_ms, 30_000);
        assert_eq!(config.history_table, "_reconcile_migrations");
        assert_eq!(config.lock_table, "_reconcile_migration_locks");
        assert_eq!(config.prompt.minimum_risk_level, RiskLevel::Medium);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = MigrationConfig::new()
            .use_transaction(false)
            .lock_timeout_ms(10)
            .lock_scope("tenant_a")
            .history_table("history")
            .lock_table("locks")
            .record_failed_migrations(false);

        assert!(!config.use_transaction);
        assert_eq!(config.lock_timeout_ms, 10);
        assert_eq!(config.lock_scope, "tenant_a");
        assert_eq!(config.bookkeeping_tables(), ["history", "locks"]);
        assert!(!config.record_failed_migrations);
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = MigrationConfig::from_str("").unwrap();
        assert_eq!(config, MigrationConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            use_transaction = false
            lock_timeout_ms = 5000
            history_table = "migrations"

            [prompt]
            minimum_risk_level = "high"
            require_explicit_confirmation = false

            [logging]
            log_progress = true
        "#;
        let config = MigrationConfig::from_str(toml).unwrap();
        assert!(!config.use_transaction);
        assert_eq!(config.lock_timeout_ms, 5000);
        assert_eq!(config.history_table, "migrations");
        assert_eq!(config.lock_table, DEFAULT_LOCK_TABLE);
        assert_eq!(config.prompt.minimum_risk_level, RiskLevel::High);
        assert!(!config.prompt.require_explicit_confirmation);
        assert!(config.prompt.enabled);
        assert!(config.logging.log_progress);
        assert!(config.logging.log_statements);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(matches!(
            MigrationConfig::from_str("lock_timeout = 5"),
            Err(MigrationError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(MigrationConfig::from_str("lock_timeout_ms = 0").is_err());
        assert!(MigrationConfig::from_str("history_table = \"x\"\nlock_table = \"x\"").is_err());
    }

    #[test]
    fn test_env_expansion() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("RECONCILE_TEST_HISTORY", "env_history") };
        let config = MigrationConfig::from_str(
            "history_table = \"${RECONCILE_TEST_HISTORY}\"\nlock_scope = \"${RECONCILE_UNSET_VAR}\"",
        )
        .unwrap();
        assert_eq!(config.history_table, "env_history");
        assert_eq!(config.lock_scope, "${RECONCILE_UNSET_VAR}");
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconcile.toml");
        std::fs::write(&path, "lock_timeout_ms = 1234\n").unwrap();
        assert_eq!(MigrationConfig::from_file(&path).unwrap().lock_timeout_ms, 1234);
        assert!(MigrationConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
