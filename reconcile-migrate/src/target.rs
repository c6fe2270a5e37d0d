//! Lowering a parsed [`Schema`] into the relational shape the differ compares.

use std::collections::{HashMap, HashSet};

use reconcile_model::{AttributeValue, Field, FieldType, Model, ReferentialAction, Schema};

use crate::dialect::{Dialect, quote_literal};
use crate::introspect::{DatabaseColumn, DatabaseForeignKey, DatabaseIndex, foreign_key_name};

/// Sentinel for database-assigned sequence values.
pub const AUTOINCREMENT_TOKEN: &str = "AUTOINCREMENT";
/// Sentinel for "the current time".
pub const CURRENT_TIMESTAMP_TOKEN: &str = "CURRENT_TIMESTAMP";
/// Sentinel for database-generated identifiers.
pub const UUID_TOKEN: &str = "UUID";

/// The target structure for one dialect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetSchema {
    /// Tables in model declaration order.
    pub tables: Vec<TargetTable>,
    /// Enum types, by database name.
    pub enums: Vec<TargetEnum>,
}

impl TargetSchema {
    /// Lower every model and enum of `schema`.
    pub fn from_schema(schema: &Schema, dialect: Dialect) -> Self {
        let tables = schema
            .models
            .iter()
            .map(|model| lower_model(schema, model, dialect))
            .collect();
        let enums = schema
            .enums
            .iter()
            .map(|e| TargetEnum {
                name: e.db_name().to_string(),
                values: e.db_values().into_iter().map(String::from).collect(),
            })
            .collect();
        Self { tables, enums }
    }

    /// Look up a table by database name.
    pub fn get_table(&self, name: &str) -> Option<&TargetTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Look up an enum by database name.
    pub fn get_enum(&self, name: &str) -> Option<&TargetEnum> {
        self.enums.iter().find(|e| e.name == name)
    }
}

/// A table the target wants to exist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetTable {
    /// Model name.
    pub model: String,
    /// Database table name.
    pub name: String,
    /// Columns, first declaration winning on duplicate names.
    pub columns: Vec<TargetColumn>,
    /// Primary key columns.
    pub primary_key: Vec<String>,
    /// Foreign keys owned by this table.
    pub foreign_keys: Vec<DatabaseForeignKey>,
    /// Unique and secondary indexes.
    pub indexes: Vec<DatabaseIndex>,
}

impl TargetTable {
    /// Look up a column by database name.
    pub fn get_column(&self, name: &str) -> Option<&TargetColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Tables this one must be created after.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.foreign_keys
            .iter()
            .map(|fk| fk.referenced_table.as_str())
            .filter(move |t| *t != self.name)
    }
}

/// A column the target wants to exist.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetColumn {
    /// Database column name.
    pub name: String,
    /// Dialect-native type.
    pub sql_type: String,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Declared default.
    pub default: Option<DefaultValue>,
    /// Whether the column is a sequence-backed key.
    pub auto_increment: bool,
}

/// A declared column default.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// `autoincrement()`; expressed through the column type, not a DEFAULT.
    AutoIncrement,
    /// `now()`.
    CurrentTimestamp,
    /// `uuid()`, `cuid()` and friends.
    GeneratedId,
    /// A string or enum value.
    Literal(String),
    /// A numeric literal, kept as written.
    Number(String),
    /// A boolean literal.
    Boolean(bool),
    /// `dbgenerated("...")`, passed through verbatim.
    Expression(String),
}

impl DefaultValue {
    /// Interpret an `@default(...)` argument.
    pub fn from_attribute(value: &AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::Function(name, args) => match name.as_str() {
                "autoincrement" => Some(Self::AutoIncrement),
                "now" => Some(Self::CurrentTimestamp),
                "uuid" | "cuid" | "nanoid" | "gen_random_uuid" => Some(Self::GeneratedId),
                "dbgenerated" => args
                    .first()
                    .and_then(|a| a.as_string())
                    .map(|e| Self::Expression(e.to_string())),
                _ => None,
            },
            AttributeValue::String(s) => Some(Self::Literal(s.clone())),
            AttributeValue::Ident(s) => match s.as_str() {
                "true" => Some(Self::Boolean(true)),
                "false" => Some(Self::Boolean(false)),
                other => Some(Self::Literal(other.to_string())),
            },
            AttributeValue::Int(i) => Some(Self::Number(i.to_string())),
            AttributeValue::Float(f) => Some(Self::Number(f.to_string())),
            AttributeValue::Boolean(b) => Some(Self::Boolean(*b)),
            AttributeValue::Array(_) | AttributeValue::FieldRefList(_) => None,
        }
    }

    /// The `DEFAULT` clause body, or `None` when nothing is emitted.
    pub fn render(&self, dialect: Dialect) -> Option<String> {
        match (self, dialect) {
            (Self::AutoIncrement, _) => None,
            (Self::CurrentTimestamp, _) => Some("CURRENT_TIMESTAMP".to_string()),
            (Self::GeneratedId, Dialect::Postgres) => Some("gen_random_uuid()".to_string()),
            (Self::GeneratedId, Dialect::MySql) => Some("(uuid())".to_string()),
            (Self::GeneratedId, Dialect::Sqlite) => None,
            (Self::Literal(s), _) => Some(quote_literal(s)),
            (Self::Number(n), _) => Some(n.clone()),
            (Self::Boolean(b), _) => Some(b.to_string()),
            (Self::Expression(e), Dialect::Sqlite) => Some(format!("({e})")),
            (Self::Expression(e), _) => Some(e.clone()),
        }
    }

    /// Comparable token: sentinels for special functions, bare text otherwise.
    pub fn normalized(&self) -> String {
        match self {
            Self::AutoIncrement => AUTOINCREMENT_TOKEN.to_string(),
            Self::CurrentTimestamp => CURRENT_TIMESTAMP_TOKEN.to_string(),
            Self::GeneratedId => UUID_TOKEN.to_string(),
            Self::Literal(s) => s.clone(),
            Self::Number(n) => n.clone(),
            Self::Boolean(b) => b.to_string(),
            Self::Expression(e) => normalize_db_default(e),
        }
    }

    /// Whether SQLite would accept this default on `ADD COLUMN`.
    pub fn is_constant(&self) -> bool {
        !matches!(self, Self::CurrentTimestamp | Self::Expression(_))
    }
}

/// Normalize a default expression as a catalog reports it.
pub fn normalize_db_default(raw: &str) -> String {
    let mut value = raw.trim();
    while value.starts_with('(') && value.ends_with(')') && value.len() >= 2 {
        value = value[1..value.len() - 1].trim();
    }

    let value = strip_cast(value);
    let lowered = value.to_ascii_lowercase();

    if lowered.starts_with("nextval(") {
        return AUTOINCREMENT_TOKEN.to_string();
    }
    if matches!(
        lowered.as_str(),
        "now()" | "current_timestamp" | "current_timestamp()" | "localtimestamp"
    ) || lowered.starts_with("current_timestamp(")
    {
        return CURRENT_TIMESTAMP_TOKEN.to_string();
    }
    if matches!(lowered.as_str(), "gen_random_uuid()" | "uuid()" | "uuid_generate_v4()") {
        return UUID_TOKEN.to_string();
    }

    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return value[1..value.len() - 1].replace("''", "'");
    }
    value.to_string()
}

/// Whether the column's live default matches the declared one.
///
/// Sequence-backed keys are compared through their type, never here. A
/// default whose expression the catalog cannot report compares on presence.
pub fn defaults_match(declared: Option<&DefaultValue>, current: &DatabaseColumn) -> bool {
    let declared = declared.filter(|d| !matches!(d, DefaultValue::AutoIncrement));
    let current_token = current
        .default_value
        .as_deref()
        .map(normalize_db_default)
        .filter(|t| t != AUTOINCREMENT_TOKEN);

    match (declared, current_token) {
        (None, None) => !current.has_default || current.auto_increment,
        (None, Some(_)) => false,
        (Some(_), None) => current.has_default && current.default_value.is_none(),
        (Some(DefaultValue::Boolean(b)), Some(token)) => {
            let token = token.to_ascii_lowercase();
            if *b {
                matches!(token.as_str(), "true" | "1" | "t")
            } else {
                matches!(token.as_str(), "false" | "0" | "f")
            }
        }
        (Some(d), Some(token)) => d.normalized() == token,
    }
}

fn strip_cast(value: &str) -> &str {
    if let Some(rest) = value.strip_prefix('\'') {
        // Skip to the closing quote, honoring doubled quotes.
        let bytes = rest.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'\'' {
                if bytes.get(i + 1) == Some(&b'\'') {
                    i += 2;
                    continue;
                }
                return &value[..i + 2];
            }
            i += 1;
        }
        return value;
    }
    match value.find("::") {
        Some(pos) => value[..pos].trim_end(),
        None => value,
    }
}

/// An enum type the target wants to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEnum {
    /// Database type name.
    pub name: String,
    /// Values in declaration order.
    pub values: Vec<String>,
}

fn lower_model(schema: &Schema, model: &Model, dialect: Dialect) -> TargetTable {
    let table = model.table_name().to_string();

    let column_of = |m: &Model, field: &str| -> String {
        m.get_field(field)
            .map(|f| f.column_name().to_string())
            .unwrap_or_else(|| field.to_string())
    };

    let primary_key: Vec<String> = match model.composite_id() {
        Some(fields) => fields.iter().map(|f| column_of(model, f.as_str())).collect(),
        None => model
            .id_fields()
            .into_iter()
            .map(|f| f.column_name().to_string())
            .collect(),
    };

    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    let mut indexes = Vec::new();
    for field in model.column_fields() {
        let name = field.column_name().to_string();
        if !seen.insert(name.clone()) {
            continue;
        }
        let is_pk = primary_key.contains(&name);
        columns.push(lower_field(schema, field, dialect, is_pk));

        if field.is_unique() && !(is_pk && primary_key.len() == 1) {
            indexes.push(DatabaseIndex {
                name: format!("uniq_{table}_{name}"),
                table: table.clone(),
                columns: vec![name],
                unique: true,
            });
        }
    }

    for index in model.indexes() {
        let index_columns: Vec<String> = index.fields.iter().map(|f| column_of(model, f.as_str())).collect();
        let prefix = if index.unique { "uniq" } else { "idx" };
        indexes.push(DatabaseIndex {
            name: index
                .name
                .clone()
                .unwrap_or_else(|| format!("{prefix}_{table}_{}", index_columns.join("_"))),
            table: table.clone(),
            columns: index_columns,
            unique: index.unique,
        });
    }

    let mut foreign_keys = Vec::new();
    for field in model.relation_fields() {
        let Some(relation) = field.relation() else {
            continue;
        };
        if !relation.owns_foreign_key() {
            continue;
        }
        let FieldType::Model(target_name) = &field.field_type else {
            continue;
        };
        let referenced = schema.get_model(target_name);
        let referenced_table = referenced
            .map(|m| m.table_name().to_string())
            .unwrap_or_else(|| target_name.to_string());
        let fk_columns: Vec<String> = relation.fields.iter().map(|f| column_of(model, f.as_str())).collect();
        let referenced_columns: Vec<String> = relation
            .references
            .iter()
            .map(|f| match referenced {
                Some(m) => column_of(m, f.as_str()),
                None => f.to_string(),
            })
            .collect();

        foreign_keys.push(DatabaseForeignKey {
            name: foreign_key_name(&table, &fk_columns, &referenced_table),
            columns: fk_columns,
            referenced_table,
            referenced_columns,
            on_delete: relation.on_delete.unwrap_or(ReferentialAction::NoAction),
            on_update: relation.on_update.unwrap_or(ReferentialAction::NoAction),
        });
    }

    TargetTable {
        model: model.name().to_string(),
        name: table,
        columns,
        primary_key,
        foreign_keys,
        indexes,
    }
}

fn lower_field(schema: &Schema, field: &Field, dialect: Dialect, is_pk: bool) -> TargetColumn {
    let default = field.default().and_then(DefaultValue::from_attribute);
    let auto_increment = matches!(default, Some(DefaultValue::AutoIncrement));

    let sql_type = match &field.field_type {
        FieldType::Scalar(scalar) if field.is_list() => dialect.list_type(*scalar),
        FieldType::Scalar(scalar) => dialect.scalar_type(*scalar, auto_increment),
        FieldType::Enum(name) => match schema.get_enum(name) {
            Some(e) => dialect.enum_type(e.db_name(), &e.db_values()),
            None => dialect.enum_type(name, &[]),
        },
        FieldType::Model(name) | FieldType::Unsupported(name) => name.to_string(),
    };

    // Enum defaults name a value; store the mapped database value.
    let default = match (&field.field_type, default) {
        (FieldType::Enum(name), Some(DefaultValue::Literal(value))) => {
            let mapped = schema
                .get_enum(name)
                .and_then(|e| e.values.iter().find(|v| v.name() == value))
                .map(|v| v.db_value().to_string())
                .unwrap_or(value);
            Some(DefaultValue::Literal(mapped))
        }
        (_, default) => default,
    };

    TargetColumn {
        name: field.column_name().to_string(),
        sql_type,
        nullable: field.is_optional() && !is_pk,
        default,
        auto_increment,
    }
}

/// Order tables so every table follows the tables it references.
///
/// Ties keep declaration order. Tables caught in a cycle are appended in
/// declaration order once nothing else can be placed.
pub fn creation_order<'a>(tables: &[&'a TargetTable]) -> Vec<&'a TargetTable> {
    let names: HashSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    let mut pending: HashMap<&str, usize> = tables
        .iter()
        .map(|t| {
            let deps: HashSet<&str> = t.dependencies().filter(|d| names.contains(d)).collect();
            (t.name.as_str(), deps.len())
        })
        .collect();

    let mut placed: HashSet<&str> = HashSet::new();
    let mut ordered = Vec::with_capacity(tables.len());

    while ordered.len() < tables.len() {
        let next = tables
            .iter()
            .find(|t| !placed.contains(t.name.as_str()) && pending.get(t.name.as_str()) == Some(&0));

        let table = match next {
            Some(t) => *t,
            None => match tables.iter().find(|t| !placed.contains(t.name.as_str())) {
                Some(t) => *t,
                None => break,
            },
        };

        placed.insert(table.name.as_str());
        ordered.push(table);

        for other in tables {
            if placed.contains(other.name.as_str()) {
                continue;
            }
            let depends: HashSet<&str> = other.dependencies().collect();
            if depends.contains(table.name.as_str()) {
                if let Some(count) = pending.get_mut(other.name.as_str()) {
                    *count = count.saturating_sub(1);
                }
            }
        }
    }

    ordered
}
