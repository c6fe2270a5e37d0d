//! Schema diffing.
//!
//! [`SchemaDiffer`] compares a live [`DatabaseSchema`] with a target
//! [`Schema`] and produces the ordered statements that reconcile them,
//! together with a summary of what changes and how risky it is.
//!
//! Statements come out in phases so referential constraints hold at every
//! step:
//!
//! 1. enum types and added enum values
//! 2. new tables, referenced tables first, each followed by its indexes
//! 3. foreign key and index drops on existing tables
//! 4. column changes and table rebuilds
//! 5. index creation on existing tables
//! 6. foreign key creation
//! 7. table drops, dependents first
//! 8. enum type drops

use serde::{Deserialize, Serialize};

use reconcile_model::Schema;

use crate::conflicts::detect_conflicts;
use crate::ddl::{DdlGenerator, ForeignKeyGuard, generator_for};
use crate::dialect::{Dialect, DialectCapabilities};
use crate::introspect::{DatabaseSchema, DatabaseTable};
use crate::target::{TargetColumn, TargetSchema, TargetTable, creation_order, defaults_match};

/// How risky a migration is.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Nothing existing changes shape.
    #[default]
    Low,
    /// Existing tables change.
    Medium,
    /// Data or constraints may be lost.
    High,
}

impl RiskLevel {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A column reference in a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Table name.
    pub table: String,
    /// Column name.
    pub column: String,
}

impl ColumnRef {
    fn new(table: &str, column: &str) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
        }
    }
}

/// One aspect of a column that changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnChange {
    /// Table name.
    pub table: String,
    /// Column name.
    pub column: String,
    /// `type: a → b`, `nullable: a → b` or `default: a → b`.
    pub change: String,
}

/// What a diff touches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSummary {
    pub tables_created: Vec<String>,
    pub tables_modified: Vec<String>,
    pub tables_dropped: Vec<String>,
    pub columns_added: Vec<ColumnRef>,
    pub columns_modified: Vec<ColumnChange>,
    pub columns_dropped: Vec<ColumnRef>,
    pub indexes_created: Vec<String>,
    pub indexes_dropped: Vec<String>,
    pub foreign_keys_created: Vec<String>,
    pub foreign_keys_dropped: Vec<String>,
    pub enums_created: Vec<String>,
    pub enums_modified: Vec<String>,
    pub enums_dropped: Vec<String>,
}

impl MigrationSummary {
    /// Whether nothing changes.
    pub fn is_empty(&self) -> bool {
        self.tables_created.is_empty()
            && self.tables_modified.is_empty()
            && self.tables_dropped.is_empty()
            && self.enums_created.is_empty()
            && self.enums_modified.is_empty()
            && self.enums_dropped.is_empty()
    }

    fn mark_modified(&mut self, table: &str) {
        if !self.tables_modified.iter().any(|t| t == table) {
            self.tables_modified.push(table.to_string());
        }
    }
}

/// Risk and cost of a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationImpact {
    pub risk_level: RiskLevel,
    /// Coarse bucket, e.g. `< 5 seconds`.
    pub estimated_duration: String,
    pub warnings: Vec<String>,
    pub tables_affected: Vec<String>,
}

/// Enum values present in the database that the target no longer lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainedEnumValues {
    /// Enum type name.
    pub enum_name: String,
    /// Values left in place.
    pub values: Vec<String>,
}

/// The outcome of one diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationDiff {
    /// Statements in execution order.
    pub statements: Vec<String>,
    pub summary: MigrationSummary,
    pub has_destructive_changes: bool,
    pub impact: MigrationImpact,
    pub retained_enum_values: Vec<RetainedEnumValues>,
    /// Set when a table is rebuilt; the executor wraps the run in it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key_guard: Option<ForeignKeyGuard>,
}

impl MigrationDiff {
    /// Whether there is nothing to run.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Knobs for a diff.
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Suffix for rebuild temp tables (`_reconcile_tmp_<table>_<suffix>`).
    pub rebuild_suffix: String,
}

#[derive(Default)]
struct Phases {
    rebuilt: bool,
    enum_creates: Vec<String>,
    table_creates: Vec<String>,
    constraint_drops: Vec<String>,
    column_changes: Vec<String>,
    index_creates: Vec<String>,
    foreign_key_adds: Vec<String>,
    table_drops: Vec<String>,
    enum_drops: Vec<String>,
}

impl Phases {
    fn into_statements(self) -> Vec<String> {
        [
            self.enum_creates,
            self.table_creates,
            self.constraint_drops,
            self.column_changes,
            self.index_creates,
            self.foreign_key_adds,
            self.table_drops,
            self.enum_drops,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Computes a [`MigrationDiff`].
pub struct SchemaDiffer<'a> {
    current: &'a DatabaseSchema,
    target: &'a Schema,
    dialect: Dialect,
    capabilities: DialectCapabilities,
    options: DiffOptions,
}

impl<'a> SchemaDiffer<'a> {
    /// Differ with the dialect's default capabilities.
    pub fn new(current: &'a DatabaseSchema, target: &'a Schema, dialect: Dialect) -> Self {
        Self {
            current,
            target,
            dialect,
            capabilities: DialectCapabilities::for_dialect(dialect, None),
            options: DiffOptions::default(),
        }
    }

    /// Override what the dialect can alter in place.
    pub fn with_capabilities(mut self, capabilities: DialectCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set diff options.
    pub fn with_options(mut self, options: DiffOptions) -> Self {
        self.options = options;
        self
    }

    /// Compute the diff.
    pub fn diff(&self) -> MigrationDiff {
        let target = TargetSchema::from_schema(self.target, self.dialect);
        let ddl = generator_for(self.dialect);

        let mut phases = Phases::default();
        let mut summary = MigrationSummary::default();
        let mut warnings = Vec::new();
        let mut destructive = false;
        let mut retained = Vec::new();

        self.diff_enums(
            &target,
            ddl.as_ref(),
            &mut phases,
            &mut summary,
            &mut warnings,
            &mut destructive,
            &mut retained,
        );

        // New tables.
        let new_tables: Vec<&TargetTable> = target
            .tables
            .iter()
            .filter(|t| self.current.get_table(&t.name).is_none())
            .collect();
        for table in creation_order(&new_tables) {
            phases.table_creates.push(ddl.create_table(table));
            for index in &table.indexes {
                phases.table_creates.push(ddl.create_index(index));
                summary.indexes_created.push(index.name.clone());
            }
            if !self.dialect.requires_inline_foreign_keys() {
                for fk in &table.foreign_keys {
                    phases.foreign_key_adds.push(ddl.add_foreign_key(&table.name, fk));
                }
            }
            summary
                .foreign_keys_created
                .extend(table.foreign_keys.iter().map(|fk| fk.name.clone()));
            summary.tables_created.push(table.name.clone());
        }

        // Existing tables.
        for table in &target.tables {
            if let Some(live) = self.current.get_table(&table.name) {
                self.diff_table(
                    live,
                    table,
                    ddl.as_ref(),
                    &mut phases,
                    &mut summary,
                    &mut warnings,
                    &mut destructive,
                );
            }
        }

        // Dropped tables.
        let dropped: Vec<&DatabaseTable> = self
            .current
            .tables
            .iter()
            .filter(|t| target.get_table(&t.name).is_none())
            .collect();
        for table in drop_order(&dropped) {
            phases.table_drops.push(ddl.drop_table(&table.name));
            summary.tables_dropped.push(table.name.clone());
            summary
                .columns_dropped
                .extend(table.columns.iter().map(|c| ColumnRef::new(&table.name, &c.name)));
            warnings.push(format!(
                "Dropping table '{}' will permanently delete all data",
                table.name
            ));
            destructive = true;
        }

        let conflicts = detect_conflicts(self.target, self.current, &target, self.dialect);
        if !conflicts.is_empty() {
            destructive = true;
            warnings.extend(conflicts);
        }

        let foreign_key_guard = if phases.rebuilt {
            ddl.foreign_key_guard()
        } else {
            None
        };
        let statements = phases.into_statements();

        let risk_level = if destructive {
            RiskLevel::High
        } else if !summary.tables_modified.is_empty() {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let mut tables_affected: Vec<String> = Vec::new();
        for name in summary
            .tables_created
            .iter()
            .chain(&summary.tables_modified)
            .chain(&summary.tables_dropped)
        {
            if !tables_affected.contains(name) {
                tables_affected.push(name.clone());
            }
        }

        MigrationDiff {
            impact: MigrationImpact {
                risk_level,
                estimated_duration: estimate_duration(statements.len(), destructive).to_string(),
                warnings,
                tables_affected,
            },
            statements,
            summary,
            has_destructive_changes: destructive,
            retained_enum_values: retained,
            foreign_key_guard,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn diff_enums(
        &self,
        target: &TargetSchema,
        ddl: &dyn DdlGenerator,
        phases: &mut Phases,
        summary: &mut MigrationSummary,
        warnings: &mut Vec<String>,
        destructive: &mut bool,
        retained: &mut Vec<RetainedEnumValues>,
    ) {
        if !self.dialect.supports_enum_types() {
            return;
        }

        for e in &target.enums {
            match self.current.get_enum(&e.name) {
                None => {
                    phases.enum_creates.extend(ddl.create_enum(&e.name, &e.values));
                    summary.enums_created.push(e.name.clone());
                }
                Some(live) => {
                    let added: Vec<&String> =
                        e.values.iter().filter(|v| !live.values.contains(v)).collect();
                    let removed: Vec<String> = live
                        .values
                        .iter()
                        .filter(|v| !e.values.contains(v))
                        .cloned()
                        .collect();

                    for value in &added {
                        phases.enum_creates.extend(ddl.add_enum_value(&e.name, value));
                    }
                    if !added.is_empty() {
                        summary.enums_modified.push(e.name.clone());
                    }
                    if !removed.is_empty() {
                        warnings.push(format!(
                            "Cannot safely remove enum values [{}] from enum '{}'. Manual migration required.",
                            removed.join(", "),
                            e.name
                        ));
                        retained.push(RetainedEnumValues {
                            enum_name: e.name.clone(),
                            values: removed,
                        });
                    }
                }
            }
        }

        let mut dropped_any = false;
        for live in &self.current.enums {
            if target.get_enum(&live.name).is_none() {
                phases.enum_drops.extend(ddl.drop_enum(&live.name));
                summary.enums_dropped.push(live.name.clone());
                dropped_any = true;
            }
        }
        if dropped_any {
            *destructive = true;
            warnings.push(
                "Dropping enum types may cause data loss in columns using these enums".to_string(),
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn diff_table(
        &self,
        live: &DatabaseTable,
        table: &TargetTable,
        ddl: &dyn DdlGenerator,
        phases: &mut Phases,
        summary: &mut MigrationSummary,
        warnings: &mut Vec<String>,
        destructive: &mut bool,
    ) {
        let name = table.name.as_str();
        let mut in_place = Vec::new();
        let mut rebuild = false;
        let mut lossy_change = false;
        let mut changed = false;

        for column in &table.columns {
            let Some(existing) = live.get_column(&column.name) else {
                summary.columns_added.push(ColumnRef::new(name, &column.name));
                changed = true;
                if self.dialect == Dialect::Sqlite && !self.sqlite_can_add(column) {
                    rebuild = true;
                } else {
                    in_place.push(ddl.add_column(name, column));
                }
                continue;
            };

            let mut type_changed = false;
            let mut nullability_changed = false;

            let from_type = self.dialect.canonical_type(&existing.data_type);
            let to_type = self.dialect.canonical_type(&column.sql_type);
            if from_type != to_type {
                type_changed = true;
                summary.columns_modified.push(ColumnChange {
                    table: name.to_string(),
                    column: column.name.clone(),
                    change: format!("type: {} → {}", existing.data_type, column.sql_type),
                });
                if is_destructive_type_change(&from_type, &to_type) {
                    lossy_change = true;
                }
            }

            let live_nullable = existing.nullable
                && !(self.dialect == Dialect::Sqlite && live.is_primary_key(&existing.name));
            if live_nullable != column.nullable {
                nullability_changed = true;
                summary.columns_modified.push(ColumnChange {
                    table: name.to_string(),
                    column: column.name.clone(),
                    change: format!("nullable: {} → {}", live_nullable, column.nullable),
                });
                if live_nullable {
                    lossy_change = true;
                }
            }

            let declared = column
                .default
                .as_ref()
                .filter(|d| d.render(self.dialect).is_some());
            let default_changed = !defaults_match(declared, existing);
            if default_changed {
                let from = existing
                    .default_value
                    .clone()
                    .unwrap_or_else(|| "none".to_string());
                let to = declared
                    .map(|d| d.normalized())
                    .unwrap_or_else(|| "none".to_string());
                summary.columns_modified.push(ColumnChange {
                    table: name.to_string(),
                    column: column.name.clone(),
                    change: format!("default: {from} → {to}"),
                });
            }

            if !(type_changed || nullability_changed || default_changed) {
                continue;
            }
            changed = true;

            if !self.capabilities.supports_alter_column {
                rebuild = true;
                continue;
            }
            if type_changed {
                push_unique(&mut in_place, ddl.alter_column_type(name, column));
            }
            if nullability_changed {
                push_unique(&mut in_place, ddl.alter_column_nullability(name, column));
            }
            if default_changed {
                push_unique(&mut in_place, ddl.alter_column_default(name, column));
            }
        }

        let mut dropped_columns = false;
        for existing in &live.columns {
            if table.get_column(&existing.name).is_some() {
                continue;
            }
            summary.columns_dropped.push(ColumnRef::new(name, &existing.name));
            dropped_columns = true;
            changed = true;
            if self.capabilities.supports_drop_column {
                in_place.push(ddl.drop_column(name, &existing.name));
            } else {
                rebuild = true;
            }
        }
        if dropped_columns {
            *destructive = true;
            warnings.push(format!(
                "Dropping columns from '{name}' will permanently delete data"
            ));
        }
        if lossy_change {
            *destructive = true;
            warnings.push(format!("Modifying columns in '{name}' may cause data loss"));
        }

        // Foreign keys.
        let dropped_fks: Vec<_> = live
            .foreign_keys
            .iter()
            .filter(|fk| !table.foreign_keys.iter().any(|t| t.name == fk.name))
            .collect();
        let added_fks: Vec<_> = table
            .foreign_keys
            .iter()
            .filter(|fk| !live.foreign_keys.iter().any(|l| l.name == fk.name))
            .collect();
        let changed_fks: Vec<_> = table
            .foreign_keys
            .iter()
            .filter(|fk| {
                live.foreign_keys
                    .iter()
                    .any(|l| l.name == fk.name && !l.same_definition(fk))
            })
            .collect();

        summary.foreign_keys_dropped.extend(
            dropped_fks
                .iter()
                .copied()
                .chain(changed_fks.iter().copied())
                .map(|fk| fk.name.clone()),
        );
        summary.foreign_keys_created.extend(
            added_fks
                .iter()
                .chain(changed_fks.iter())
                .map(|fk| fk.name.clone()),
        );
        if !dropped_fks.is_empty() {
            *destructive = true;
            warnings.push(format!(
                "Dropping foreign key constraints from '{name}' may affect data integrity"
            ));
        }
        let fks_differ = !(dropped_fks.is_empty() && added_fks.is_empty() && changed_fks.is_empty());
        if fks_differ {
            changed = true;
            if self.dialect.requires_inline_foreign_keys() {
                rebuild = true;
            }
        }

        if rebuild {
            let current_columns: Vec<String> = live.columns.iter().map(|c| c.name.clone()).collect();
            phases.column_changes.extend(ddl.rebuild_table(
                table,
                &current_columns,
                &self.options.rebuild_suffix,
            ));
            warnings.push(format!(
                "SQLite will rebuild table '{name}' to apply column changes"
            ));

            phases.rebuilt = true;
            let referencing: Vec<&str> = self
                .current
                .tables_referencing(name)
                .into_iter()
                .map(|t| t.name.as_str())
                .collect();
            if !referencing.is_empty() {
                if ddl.foreign_key_guard().is_some() {
                    warnings.push(format!(
                        "Rebuilding table '{}' suspends foreign key enforcement; references from [{}] are checked before the migration commits",
                        name,
                        referencing.join(", ")
                    ));
                } else {
                    // Dropping the original would delete or orphan rows in these tables.
                    *destructive = true;
                    warnings.push(format!(
                        "Rebuilding table '{}' drops rows referenced from [{}]",
                        name,
                        referencing.join(", ")
                    ));
                }
            }

            summary.mark_modified(name);
            return;
        }

        phases.column_changes.extend(in_place);

        for fk in dropped_fks.iter().copied().chain(changed_fks.iter().copied()) {
            phases
                .constraint_drops
                .push(ddl.drop_foreign_key(name, &fk.name));
        }
        for fk in added_fks.iter().chain(changed_fks.iter()) {
            phases.foreign_key_adds.push(ddl.add_foreign_key(name, fk));
        }

        // Indexes.
        let live_indexes: Vec<_> = live
            .indexes
            .iter()
            .filter(|i| !i.name.starts_with("sqlite_autoindex"))
            .filter(|i| !live.unique_constraints.iter().any(|u| u.name == i.name))
            .collect();

        for index in &live_indexes {
            match table.indexes.iter().find(|t| t.name == index.name) {
                None => {
                    phases.constraint_drops.push(ddl.drop_index(index));
                    summary.indexes_dropped.push(index.name.clone());
                    changed = true;
                }
                Some(wanted) if !wanted.same_definition(index) => {
                    phases.constraint_drops.push(ddl.drop_index(index));
                    phases.index_creates.push(ddl.create_index(wanted));
                    summary.indexes_dropped.push(index.name.clone());
                    summary.indexes_created.push(wanted.name.clone());
                    changed = true;
                }
                Some(_) => {}
            }
        }
        for index in &table.indexes {
            if !live_indexes.iter().any(|i| i.name == index.name) {
                phases.index_creates.push(ddl.create_index(index));
                summary.indexes_created.push(index.name.clone());
                changed = true;
            }
        }

        if changed {
            summary.mark_modified(name);
        }
    }

    /// SQLite adds a column in place only when existing rows can be filled
    /// with a constant.
    fn sqlite_can_add(&self, column: &TargetColumn) -> bool {
        let rendered = column
            .default
            .as_ref()
            .filter(|d| d.render(Dialect::Sqlite).is_some());
        match rendered {
            Some(default) => default.is_constant(),
            None => column.nullable,
        }
    }
}

fn push_unique(statements: &mut Vec<String>, statement: String) {
    if !statements.contains(&statement) {
        statements.push(statement);
    }
}

/// Order tables for dropping: a table goes before every table it references.
fn drop_order<'t>(tables: &[&'t DatabaseTable]) -> Vec<&'t DatabaseTable> {
    let mut remaining: Vec<&DatabaseTable> = tables.to_vec();
    let mut ordered = Vec::with_capacity(tables.len());

    while !remaining.is_empty() {
        let referenced_by_remaining = |name: &str| {
            remaining.iter().any(|t| {
                t.name != name
                    && t.foreign_keys.iter().any(|fk| fk.referenced_table == name)
            })
        };
        let position = remaining
            .iter()
            .position(|t| !referenced_by_remaining(&t.name))
            .unwrap_or(0);
        ordered.push(remaining.remove(position));
    }

    ordered
}

/// Type conversions that can lose data, as (from, to) substrings of the
/// uppercase canonical types.
const DESTRUCTIVE_TYPE_CHANGES: &[(&str, &str)] = &[
    ("TEXT", "INT"),
    ("VARCHAR", "INT"),
    ("TEXT", "BOOL"),
    ("INT", "BOOL"),
    ("TIMESTAMP", "INT"),
    ("JSON", "TEXT"),
    ("BIGINT", "INTEGER"),
    ("BIGINT", "SMALLINT"),
    ("INTEGER", "SMALLINT"),
    ("DOUBLE", "INT"),
    ("REAL", "INT"),
    ("DECIMAL", "INT"),
    ("TEXT", "DECIMAL"),
    ("TEXT", "REAL"),
    ("TEXT", "DOUBLE"),
    ("TEXT", "TIMESTAMP"),
    ("TEXT", "DATE"),
    ("TEXT", "UUID"),
];

/// Whether converting between two canonical types can lose data.
pub fn is_destructive_type_change(from: &str, to: &str) -> bool {
    let from = from.to_ascii_uppercase();
    let to = to.to_ascii_uppercase();
    DESTRUCTIVE_TYPE_CHANGES
        .iter()
        .any(|(a, b)| from.contains(a) && to.contains(b))
}

/// Coarse duration bucket.
pub fn estimate_duration(statements: usize, destructive: bool) -> &'static str {
    match statements {
        0 => "< 1 second",
        n if n <= 5 && !destructive => "< 5 seconds",
        n if n <= 10 => "< 30 seconds",
        _ if destructive => "1-5 minutes",
        _ => "< 1 minute",
    }
}
