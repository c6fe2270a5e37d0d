//! Structural problems in the target, reported as warnings.
//!
//! Nothing here blocks a diff. Every finding is surfaced in the impact
//! warnings and marks the diff destructive so a human looks at it.

use std::collections::{HashMap, HashSet};

use reconcile_model::{FieldType, Schema};

use crate::dialect::Dialect;
use crate::introspect::DatabaseSchema;
use crate::target::TargetSchema;

/// Table names that collide with SQL keywords.
pub const RESERVED_KEYWORDS: &[&str] = &[
    "user", "order", "group", "table", "index", "key", "value", "select", "from", "where",
];

/// Safe type conversions, by canonical source type.
const COMPATIBLE_CONVERSIONS: &[(&str, &[&str])] = &[
    ("SMALLINT", &["INTEGER", "BIGINT", "DECIMAL", "REAL", "DOUBLE PRECISION", "TEXT"]),
    ("INTEGER", &["BIGINT", "DECIMAL", "REAL", "DOUBLE PRECISION", "TEXT"]),
    ("BIGINT", &["DECIMAL", "REAL", "DOUBLE PRECISION", "TEXT"]),
    ("REAL", &["DOUBLE PRECISION", "DECIMAL", "TEXT"]),
    ("DOUBLE PRECISION", &["DECIMAL", "TEXT"]),
    ("DECIMAL", &["TEXT"]),
    ("TEXT", &["VARCHAR", "CHAR"]),
    ("VARCHAR", &["TEXT", "CHAR"]),
    ("CHAR", &["VARCHAR", "TEXT"]),
    ("BOOLEAN", &["TEXT"]),
    ("DATE", &["DATETIME", "TIMESTAMP", "TEXT"]),
    ("DATETIME", &["TIMESTAMP", "TEXT"]),
    ("TIMESTAMP", &["TIMESTAMPTZ", "TEXT"]),
];

/// Run every check and collect the messages.
pub fn detect_conflicts(
    schema: &Schema,
    current: &DatabaseSchema,
    target: &TargetSchema,
    dialect: Dialect,
) -> Vec<String> {
    let mut conflicts = Vec::new();
    conflicts.extend(reserved_keyword_conflicts(schema));
    conflicts.extend(duplicate_column_conflicts(schema));
    conflicts.extend(missing_relation_conflicts(schema));
    conflicts.extend(circular_reference_conflicts(schema));
    conflicts.extend(type_conflicts(current, target, dialect));
    conflicts.extend(nullability_conflicts(current, target, dialect));
    conflicts
}

/// Tables named after reserved keywords.
pub fn reserved_keyword_conflicts(schema: &Schema) -> Vec<String> {
    schema
        .models
        .iter()
        .map(|m| m.table_name())
        .filter(|name| RESERVED_KEYWORDS.contains(&name.to_ascii_lowercase().as_str()))
        .map(|name| format!("Table name '{name}' conflicts with SQL reserved keyword"))
        .collect()
}

/// Two fields of one model mapping to the same column.
pub fn duplicate_column_conflicts(schema: &Schema) -> Vec<String> {
    let mut conflicts = Vec::new();
    for model in &schema.models {
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        for field in model.column_fields() {
            let column = field.column_name();
            if !seen.insert(column) && reported.insert(column) {
                conflicts.push(format!(
                    "Duplicate column name '{}' in table '{}'",
                    column,
                    model.name()
                ));
            }
        }
    }
    conflicts
}

/// Relation fields pointing at models that do not exist.
pub fn missing_relation_conflicts(schema: &Schema) -> Vec<String> {
    let mut conflicts = Vec::new();
    for model in &schema.models {
        for field in model.relation_fields() {
            let FieldType::Model(target) = &field.field_type else {
                continue;
            };
            if schema.get_model(target).is_none() {
                conflicts.push(format!(
                    "Field '{}' in table '{}' references non-existent table '{}'",
                    field.name(),
                    model.name(),
                    target
                ));
            }
        }
    }
    conflicts
}

/// Cycles among foreign-key-owning relations.
///
/// Only the side that declares `fields`/`references` contributes an edge. A
/// reference back to the immediate parent is the other half of a
/// bidirectional relation and is skipped. Self-references are cycles.
pub fn circular_reference_conflicts(schema: &Schema) -> Vec<String> {
    let mut graph: HashMap<&str, Vec<&str>> = HashMap::new();
    for model in &schema.models {
        let edges = graph.entry(model.name()).or_default();
        for field in model.relation_fields() {
            let owns = field.relation().is_some_and(|r| r.owns_foreign_key());
            if let (true, FieldType::Model(target)) = (owns, &field.field_type) {
                if schema.get_model(target).is_some() {
                    edges.push(target.as_str());
                }
            }
        }
    }

    let mut visited = HashSet::new();
    let mut reported = HashSet::new();
    let mut conflicts = Vec::new();

    for model in &schema.models {
        if !visited.contains(model.name()) {
            let mut stack = Vec::new();
            visit(
                model.name(),
                None,
                &graph,
                &mut visited,
                &mut stack,
                &mut reported,
                &mut conflicts,
            );
        }
    }

    conflicts
}

fn visit<'a>(
    node: &'a str,
    parent: Option<&'a str>,
    graph: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
    reported: &mut HashSet<Vec<&'a str>>,
    conflicts: &mut Vec<String>,
) {
    visited.insert(node);
    stack.push(node);

    for &next in graph.get(node).map(Vec::as_slice).unwrap_or_default() {
        if Some(next) == parent && next != node {
            continue;
        }
        if let Some(start) = stack.iter().position(|n| *n == next) {
            let mut cycle: Vec<&str> = stack[start..].to_vec();
            let mut key = cycle.clone();
            key.sort_unstable();
            if reported.insert(key) {
                cycle.push(next);
                conflicts.push(format!("Circular reference detected: {}", cycle.join(" -> ")));
            }
        } else if !visited.contains(next) {
            visit(next, Some(node), graph, visited, stack, reported, conflicts);
        }
    }

    stack.pop();
}

/// Whether a canonical type may be converted to another without loss.
pub fn is_compatible_conversion(from: &str, to: &str) -> bool {
    from == to
        || COMPATIBLE_CONVERSIONS
            .iter()
            .any(|(source, targets)| *source == from && targets.contains(&to))
}

/// Column type changes outside the compatibility table.
pub fn type_conflicts(current: &DatabaseSchema, target: &TargetSchema, dialect: Dialect) -> Vec<String> {
    let mut conflicts = Vec::new();
    for table in &target.tables {
        let Some(live) = current.get_table(&table.name) else {
            continue;
        };
        for column in &table.columns {
            let Some(existing) = live.get_column(&column.name) else {
                continue;
            };
            let from = dialect.canonical_type(&existing.data_type).to_ascii_uppercase();
            let to = dialect.canonical_type(&column.sql_type).to_ascii_uppercase();
            if !is_compatible_conversion(&from, &to) {
                conflicts.push(format!(
                    "Incompatible type change for column '{}' in table '{}': {} cannot be safely converted to {}",
                    column.name, table.name, from, to
                ));
            }
        }
    }
    conflicts
}

/// Nullable columns becoming NOT NULL.
pub fn nullability_conflicts(
    current: &DatabaseSchema,
    target: &TargetSchema,
    dialect: Dialect,
) -> Vec<String> {
    let mut conflicts = Vec::new();
    for table in &target.tables {
        let Some(live) = current.get_table(&table.name) else {
            continue;
        };
        for column in &table.columns {
            let Some(existing) = live.get_column(&column.name) else {
                continue;
            };
            let live_nullable = existing.nullable
                && !(dialect == Dialect::Sqlite && live.is_primary_key(&existing.name));
            if live_nullable && !column.nullable {
                conflicts.push(format!(
                    "Cannot make column '{}' in table '{}' NOT NULL: existing data may contain NULL values",
                    column.name, table.name
                ));
            }
        }
    }
    conflicts
}
