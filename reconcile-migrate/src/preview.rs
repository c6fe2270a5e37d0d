//! Risk assessment and human-readable previews.
//!
//! Everything here is a pure function of a [`MigrationDiff`], the live
//! schema it was computed against and the prompt configuration.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::config::PromptConfig;
use crate::diff::{MigrationDiff, MigrationSummary, RiskLevel};
use crate::introspect::DatabaseSchema;
use crate::rollback::reverse_statements;

/// Statements above this count add risk.
const MANY_STATEMENTS: usize = 10;
/// Tables wider than this are slow to alter.
const WIDE_TABLE_COLUMNS: usize = 20;

const REBUILD_PREFIX: &str = "_reconcile_tmp_";

static ALTER_TABLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)ALTER\s+TABLE\s+["`]?([^"`\s]+)["`]?"#).ok());
static DROP_COLUMN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"(?i)ALTER\s+TABLE\s+["`]?([^"`\s]+)["`]?\s+DROP\s+COLUMN\s+["`]?([^"`\s]+)["`]?"#)
        .ok()
});
static INDEX_ON: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)\sON\s+["`]?([^"`\s(]+)["`]?"#).ok());

fn capture(re: &LazyLock<Option<Regex>>, text: &str, group: usize) -> Option<String> {
    let re = re.as_ref()?;
    re.captures(text)?.get(group).map(|m| m.as_str().to_string())
}

fn push_unique(into: &mut Vec<String>, value: &str) {
    if !into.iter().any(|v| v == value) {
        into.push(value.to_string());
    }
}

/// Data that may be lost.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataImpact {
    pub tables_with_data_loss: Vec<String>,
    pub irreversible_operations: Vec<String>,
}

/// Statements that lock or rewrite tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceImpact {
    pub downtime_operations: Vec<String>,
    pub slow_operations: Vec<String>,
    pub recommended_maintenance_window: String,
}

/// Objects outside the changed tables that feel the change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyImpact {
    pub dependent_tables: Vec<String>,
    pub affected_constraints: Vec<String>,
}

/// The diff summary plus impact analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedSummary {
    #[serde(flatten)]
    pub summary: MigrationSummary,
    pub total_operations: usize,
    pub data_impact: DataImpact,
    pub performance_impact: PerformanceImpact,
    pub dependencies: DependencyImpact,
}

/// Scored risk with reasons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub score: u32,
    pub factors: Vec<String>,
    pub recommendations: Vec<String>,
}

/// What undoing the migration would look like.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackPreview {
    pub available: bool,
    pub statements: Vec<String>,
    pub warnings: Vec<String>,
}

/// Everything a confirmation layer needs to show.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPreview {
    pub statements: Vec<String>,
    pub summary: DetailedSummary,
    pub risk_assessment: RiskAssessment,
    pub description: String,
    pub rollback: RollbackPreview,
    pub warnings: Vec<String>,
}

/// Whether a statement keeps a table unavailable while it runs.
fn is_downtime_operation(statement: &str) -> bool {
    let upper = statement.to_ascii_uppercase();
    upper.contains("DROP TABLE")
        || upper.contains("ALTER TABLE")
        || upper.contains("CREATE INDEX")
        || upper.contains("CREATE UNIQUE INDEX")
        || statement.contains(REBUILD_PREFIX)
}

fn is_slow_operation(statement: &str) -> bool {
    let upper = statement.to_ascii_uppercase();
    upper.contains("CREATE INDEX")
        || upper.contains("CREATE UNIQUE INDEX")
        || upper.contains("ALTER TABLE")
        || upper.starts_with("INSERT INTO")
}

/// Build the detailed summary.
pub fn detailed_summary(diff: &MigrationDiff, current: &DatabaseSchema) -> DetailedSummary {
    let summary = &diff.summary;

    let mut tables_with_data_loss = Vec::new();
    for table in summary
        .tables_dropped
        .iter()
        .chain(summary.columns_dropped.iter().map(|c| &c.table))
    {
        push_unique(&mut tables_with_data_loss, table);
    }

    let irreversible_operations = diff
        .statements
        .iter()
        .filter(|s| {
            let upper = s.to_ascii_uppercase();
            upper.contains("DROP TABLE") || upper.contains("DROP COLUMN")
        })
        .cloned()
        .collect();

    let downtime_operations: Vec<String> = diff
        .statements
        .iter()
        .filter(|s| is_downtime_operation(s))
        .cloned()
        .collect();
    let slow_operations = diff
        .statements
        .iter()
        .filter(|s| is_slow_operation(s))
        .cloned()
        .collect();

    let mut dependent_tables = Vec::new();
    let mut affected_constraints = Vec::new();
    for name in summary.tables_modified.iter().chain(&summary.tables_dropped) {
        for referencing in current.tables_referencing(name) {
            if referencing.name != *name {
                push_unique(&mut dependent_tables, &referencing.name);
            }
        }
        if let Some(table) = current.get_table(name) {
            for fk in &table.foreign_keys {
                push_unique(&mut affected_constraints, &fk.name);
            }
            for unique in &table.unique_constraints {
                push_unique(&mut affected_constraints, &unique.name);
            }
        }
    }

    let recommended_maintenance_window =
        maintenance_window(diff.statements.len(), !downtime_operations.is_empty()).to_string();

    DetailedSummary {
        summary: summary.clone(),
        total_operations: diff.statements.len(),
        data_impact: DataImpact {
            tables_with_data_loss,
            irreversible_operations,
        },
        performance_impact: PerformanceImpact {
            downtime_operations,
            slow_operations,
            recommended_maintenance_window,
        },
        dependencies: DependencyImpact {
            dependent_tables,
            affected_constraints,
        },
    }
}

/// Coarse maintenance window bucket.
pub fn maintenance_window(operations: usize, has_downtime_operations: bool) -> &'static str {
    if !has_downtime_operations && operations <= 5 {
        "No maintenance window required"
    } else if operations <= 5 {
        "5-10 minutes"
    } else if operations <= 15 {
        "15-30 minutes"
    } else {
        "30+ minutes"
    }
}

/// Score a migration. Five points or more is high risk, two or more medium.
pub fn assess_risk(diff: &MigrationDiff, detailed: &DetailedSummary) -> RiskAssessment {
    let mut score = 0;
    let mut factors = Vec::new();
    let mut recommendations = Vec::new();
    let summary = &detailed.summary;

    if diff.has_destructive_changes {
        score += 3;
        factors.push("Contains destructive operations that may cause data loss".to_string());
        recommendations.push("Create a backup before proceeding".to_string());
    }
    if !summary.tables_dropped.is_empty() {
        score += 3;
        factors.push(format!("Dropping {} table(s)", summary.tables_dropped.len()));
        recommendations.push("Verify that dropped tables are no longer needed".to_string());
    }
    if !summary.columns_dropped.is_empty() {
        score += 2;
        factors.push(format!("Dropping {} column(s)", summary.columns_dropped.len()));
        recommendations.push("Ensure dropped columns are not used by application code".to_string());
    }
    if !detailed.dependencies.dependent_tables.is_empty() {
        score += 2;
        factors.push(format!(
            "Affects {} dependent table(s)",
            detailed.dependencies.dependent_tables.len()
        ));
        recommendations
            .push("Review impact on dependent tables and foreign key constraints".to_string());
    }
    if !detailed.performance_impact.downtime_operations.is_empty() {
        score += 1;
        factors.push("May cause temporary downtime".to_string());
        recommendations.push("Schedule during maintenance window".to_string());
    }
    if detailed.total_operations > MANY_STATEMENTS {
        score += 1;
        factors.push(format!(
            "Large number of operations ({})",
            detailed.total_operations
        ));
        recommendations.push("Consider breaking into smaller migrations".to_string());
    }

    let level = match score {
        s if s >= 5 => RiskLevel::High,
        s if s >= 2 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    };
    if level == RiskLevel::High {
        recommendations.push("Test thoroughly in staging environment".to_string());
        recommendations.push("Have rollback plan ready".to_string());
    }

    RiskAssessment {
        level,
        score,
        factors,
        recommendations,
    }
}

/// Multi-line description of a detailed summary.
pub fn describe(detailed: &DetailedSummary) -> String {
    if detailed.total_operations == 0 {
        return "No changes detected - database schema is up to date.".to_string();
    }

    let s = &detailed.summary;
    let mut lines = Vec::new();

    for (verb, tables) in [
        ("Create", &s.tables_created),
        ("Modify", &s.tables_modified),
        ("Drop", &s.tables_dropped),
    ] {
        if !tables.is_empty() {
            lines.push(format!("{verb} {} table(s): {}", tables.len(), tables.join(", ")));
        }
    }

    let columns: Vec<String> = [
        ("add", s.columns_added.len()),
        ("modify", s.columns_modified.len()),
        ("drop", s.columns_dropped.len()),
    ]
    .into_iter()
    .filter(|(_, n)| *n > 0)
    .map(|(verb, n)| format!("{verb} {n}"))
    .collect();
    if !columns.is_empty() {
        lines.push(format!("Column changes: {}", columns.join(", ")));
    }

    let indexes: Vec<String> = [
        ("create", s.indexes_created.len()),
        ("drop", s.indexes_dropped.len()),
    ]
    .into_iter()
    .filter(|(_, n)| *n > 0)
    .map(|(verb, n)| format!("{verb} {n}"))
    .collect();
    if !indexes.is_empty() {
        lines.push(format!("Index changes: {}", indexes.join(", ")));
    }

    if !detailed.data_impact.tables_with_data_loss.is_empty() {
        lines.push(format!(
            "WARNING: Operations may cause data loss in: {}",
            detailed.data_impact.tables_with_data_loss.join(", ")
        ));
    }

    lines.join("\n")
}

/// Rollback statements the diff would get if applied as is.
pub fn rollback_preview(statements: &[String]) -> RollbackPreview {
    let (statements_back, warnings) = reverse_statements(statements);
    RollbackPreview {
        available: !statements_back.is_empty() && warnings.is_empty(),
        statements: statements_back,
        warnings,
    }
}

/// Operational warnings about a diff, beyond what the differ reports.
pub fn migration_warnings(diff: &MigrationDiff, current: &DatabaseSchema) -> Vec<String> {
    let mut warnings = Vec::new();

    for statement in &diff.statements {
        let upper = statement.to_ascii_uppercase();
        let rebuild = statement.contains(REBUILD_PREFIX);

        if upper.contains("ALTER TABLE") && !rebuild {
            if let Some(table) = capture(&ALTER_TABLE, statement, 1)
                .and_then(|name| current.get_table(&name))
                .filter(|t| t.columns.len() > WIDE_TABLE_COLUMNS)
            {
                push_unique(
                    &mut warnings,
                    &format!(
                        "Altering table '{}' with {} columns may be slow",
                        table.name,
                        table.columns.len()
                    ),
                );
            }
        }

        if upper.contains("ADD COLUMN") && upper.contains("NOT NULL") && !upper.contains("DEFAULT") {
            push_unique(
                &mut warnings,
                "Adding NOT NULL column without default value may fail if table contains data",
            );
        }

        if upper.contains("DROP COLUMN") {
            if let (Some(table), Some(column)) = (
                capture(&DROP_COLUMN, statement, 1),
                capture(&DROP_COLUMN, statement, 2),
            ) {
                let referenced = current
                    .get_table(&table)
                    .is_some_and(|t| t.foreign_keys.iter().any(|fk| fk.columns.contains(&column)));
                if referenced {
                    warnings.push(format!(
                        "Dropping column '{column}' from '{table}' may affect foreign key relationships"
                    ));
                }
            }
        }

        if upper.contains("CREATE INDEX") || upper.contains("CREATE UNIQUE INDEX") {
            if let Some(table) = capture(&INDEX_ON, statement, 1) {
                push_unique(
                    &mut warnings,
                    &format!(
                        "Creating index on table '{table}' may take significant time if table is large"
                    ),
                );
            }
        }

        if upper.contains("RENAME") && !rebuild {
            push_unique(
                &mut warnings,
                "Rename operations may break application code that references the old names",
            );
        }
    }

    for dropped in &diff.summary.tables_dropped {
        let dependents: Vec<&str> = current
            .tables_referencing(dropped)
            .into_iter()
            .map(|t| t.name.as_str())
            .filter(|name| name != dropped)
            .collect();
        if !dependents.is_empty() {
            warnings.push(format!(
                "Dropping table '{dropped}' will affect {} dependent table(s): {}",
                dependents.len(),
                dependents.join(", ")
            ));
        }
    }

    for change in &diff.summary.columns_modified {
        if change.change.starts_with("type:") {
            warnings.push(format!(
                "Type change for column '{}' in table '{}' may cause data conversion issues",
                change.column, change.table
            ));
        }
    }

    warnings
}

/// Assemble a full preview.
pub fn build_preview(diff: &MigrationDiff, current: &DatabaseSchema) -> MigrationPreview {
    let summary = detailed_summary(diff, current);
    let risk_assessment = assess_risk(diff, &summary);
    let description = describe(&summary);
    let mut warnings = diff.impact.warnings.clone();
    for warning in migration_warnings(diff, current) {
        push_unique(&mut warnings, &warning);
    }

    MigrationPreview {
        statements: diff.statements.clone(),
        rollback: rollback_preview(&diff.statements),
        summary,
        risk_assessment,
        description,
        warnings,
    }
}

/// Whether the risk level reaches the configured prompt threshold.
pub fn should_prompt(risk: RiskLevel, prompt: &PromptConfig) -> bool {
    prompt.enabled && risk >= prompt.minimum_risk_level
}

/// What the confirmation step must do before a migration runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationGate {
    /// Below the prompt threshold, or prompting disabled.
    NotRequired,
    /// Prompted, and approval needs no explicit answer.
    AutoApproved,
    /// A [`Confirmer`] must say yes.
    ExplicitRequired,
}

/// Decide the gate. High risk is never auto-approved while explicit
/// confirmation is configured.
pub fn confirmation_gate(risk: RiskLevel, prompt: &PromptConfig) -> ConfirmationGate {
    if !should_prompt(risk, prompt) {
        ConfirmationGate::NotRequired
    } else if risk == RiskLevel::High && prompt.require_explicit_confirmation {
        ConfirmationGate::ExplicitRequired
    } else {
        ConfirmationGate::AutoApproved
    }
}

/// Answers explicit confirmation requests.
pub trait Confirmer: Send + Sync {
    /// Whether to go ahead with `preview`.
    fn confirm(&self, preview: &MigrationPreview) -> bool;
}

/// Never approves.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl Confirmer for DenyAll {
    fn confirm(&self, _preview: &MigrationPreview) -> bool {
        false
    }
}

/// Always approves.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

impl Confirmer for ApproveAll {
    fn confirm(&self, _preview: &MigrationPreview) -> bool {
        true
    }
}
