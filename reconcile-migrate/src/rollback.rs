//! Reverse statements for recorded migrations.
//!
//! Rollback is syntactic: each forward statement is matched against a small
//! rule table and the first matching rule writes its inverse. Statements no
//! rule recognizes make the migration irreversible.

use std::sync::LazyLock;

use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::history::checksum;

/// Identifier as written by any dialect: `"double""quoted"`, `` `backticked` `` or bare.
const IDENT: &str = r#"(?:"(?:[^"]|"")+"|`[^`]+`|[A-Za-z_][A-Za-z0-9_$]*)"#;

type Inverse = fn(&Captures<'_>) -> String;

struct ReverseRule {
    pattern: Regex,
    inverse: Inverse,
}

fn rule(pattern: String, inverse: Inverse) -> Option<ReverseRule> {
    Regex::new(&pattern)
        .ok()
        .map(|pattern| ReverseRule { pattern, inverse })
}

static RULES: LazyLock<Vec<ReverseRule>> = LazyLock::new(|| {
    [
        rule(
            format!(r"(?i)^\s*CREATE\s+TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?(?P<table>{IDENT})"),
            |c| format!("DROP TABLE {}", &c["table"]),
        ),
        rule(
            format!(r"(?i)^\s*ALTER\s+TABLE\s+(?P<table>{IDENT})\s+ADD\s+COLUMN\s+(?P<column>{IDENT})"),
            |c| format!("ALTER TABLE {} DROP COLUMN {}", &c["table"], &c["column"]),
        ),
        rule(
            format!(
                r"(?i)^\s*CREATE\s+(?:UNIQUE\s+)?INDEX\s+(?:IF\s+NOT\s+EXISTS\s+)?(?P<index>{IDENT})\s+ON\s+(?P<table>{IDENT})"
            ),
            |c| {
                if c["index"].starts_with('`') {
                    format!("DROP INDEX {} ON {}", &c["index"], &c["table"])
                } else {
                    format!("DROP INDEX {}", &c["index"])
                }
            },
        ),
        rule(
            format!(
                r"(?i)^\s*ALTER\s+TABLE\s+(?P<table>{IDENT})\s+ADD\s+CONSTRAINT\s+(?P<name>{IDENT})\s+FOREIGN\s+KEY"
            ),
            |c| {
                if c["table"].starts_with('`') {
                    format!("ALTER TABLE {} DROP FOREIGN KEY {}", &c["table"], &c["name"])
                } else {
                    format!("ALTER TABLE {} DROP CONSTRAINT {}", &c["table"], &c["name"])
                }
            },
        ),
        rule(
            format!(r"(?i)^\s*CREATE\s+TYPE\s+(?P<name>{IDENT})\s+AS\s+ENUM"),
            |c| format!("DROP TYPE IF EXISTS {}", &c["name"]),
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
});

/// The inverse of one statement, if a rule knows it.
pub fn reverse_statement(statement: &str) -> Option<String> {
    RULES.iter().find_map(|rule| {
        rule.pattern
            .captures(statement)
            .map(|captures| (rule.inverse)(&captures))
    })
}

/// Reverse statements for a whole migration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRollback {
    pub migration_id: String,
    /// Inverses, last forward statement first.
    pub rollback_statements: Vec<String>,
    pub rollback_checksum: String,
    pub can_rollback: bool,
    pub warnings: Vec<String>,
}

/// Reverse statements and warnings without an id, for previews.
pub fn reverse_statements(statements: &[String]) -> (Vec<String>, Vec<String>) {
    let mut reversed = Vec::new();
    let mut warnings = Vec::new();
    for statement in statements.iter().rev() {
        match reverse_statement(statement) {
            Some(inverse) => reversed.push(inverse),
            None => warnings.push(format!(
                "Cannot generate rollback for statement: {statement}"
            )),
        }
    }
    (reversed, warnings)
}

/// Build the rollback for a migration's executed statements.
pub fn generate_rollback(migration_id: &str, statements: &[String]) -> MigrationRollback {
    let (rollback_statements, warnings) = reverse_statements(statements);
    MigrationRollback {
        migration_id: migration_id.to_string(),
        rollback_checksum: checksum(&rollback_statements.join("\n")),
        can_rollback: !rollback_statements.is_empty() && warnings.is_empty(),
        rollback_statements,
        warnings,
    }
}
