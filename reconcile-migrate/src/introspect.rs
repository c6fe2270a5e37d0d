//! Reading the live database structure.
//!
//! The driver's generic metadata API only knows tables and columns. Primary
//! keys, foreign keys, indexes and enums come from dialect catalogs: SQLite
//! pragmas when the `sqlite_version()` probe answers, otherwise the
//! PostgreSQL or MySQL catalog queries below. Any failure aborts the whole
//! read; a partial snapshot is never returned.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use reconcile_model::ReferentialAction;

use crate::database::{Database, Row, TableMetadata, row_bool, row_i64, row_str};
use crate::dialect::Dialect;
use crate::error::{MigrateResult, MigrationError};
use crate::events::CatalogSource;

/// Snapshot of the live structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    /// Base tables.
    pub tables: Vec<DatabaseTable>,
    /// Views; never diffed.
    pub views: Vec<DatabaseView>,
    /// Every index across all tables.
    pub indexes: Vec<DatabaseIndex>,
    /// Standalone enum types.
    pub enums: Vec<DatabaseEnum>,
}

impl DatabaseSchema {
    /// Look up a table by name.
    pub fn get_table(&self, name: &str) -> Option<&DatabaseTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Look up an enum by name.
    pub fn get_enum(&self, name: &str) -> Option<&DatabaseEnum> {
        self.enums.iter().find(|e| e.name == name)
    }

    /// Tables with a foreign key pointing at `table`, excluding `table` itself.
    pub fn tables_referencing(&self, table: &str) -> Vec<&DatabaseTable> {
        self.tables
            .iter()
            .filter(|t| t.name != table && t.foreign_keys.iter().any(|fk| fk.referenced_table == table))
            .collect()
    }
}

/// A live table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseTable {
    /// Table name.
    pub name: String,
    /// Columns in ordinal order.
    pub columns: Vec<DatabaseColumn>,
    /// Primary key columns, in key order.
    pub primary_key: Vec<String>,
    /// Foreign keys declared on this table.
    pub foreign_keys: Vec<DatabaseForeignKey>,
    /// Unique constraints (as opposed to unique indexes).
    pub unique_constraints: Vec<DatabaseUniqueConstraint>,
    /// Secondary indexes, unique or not.
    pub indexes: Vec<DatabaseIndex>,
}

impl DatabaseTable {
    /// Look up a column by name.
    pub fn get_column(&self, name: &str) -> Option<&DatabaseColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether the column is part of the primary key.
    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }
}

/// A live column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseColumn {
    /// Column name.
    pub name: String,
    /// Dialect-native type.
    #[serde(rename = "type")]
    pub data_type: String,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Default expression, when known.
    pub default_value: Option<String>,
    /// Whether a default exists, even if its expression is unknown.
    pub has_default: bool,
    /// Whether the database assigns values automatically.
    pub auto_increment: bool,
}

/// A foreign key, live or target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseForeignKey {
    /// Constraint name.
    pub name: String,
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub referenced_table: String,
    /// Referenced columns.
    pub referenced_columns: Vec<String>,
    /// `ON DELETE` action.
    pub on_delete: ReferentialAction,
    /// `ON UPDATE` action.
    pub on_update: ReferentialAction,
}

impl DatabaseForeignKey {
    /// Whether two keys describe the same constraint.
    pub fn same_definition(&self, other: &Self) -> bool {
        self.columns == other.columns
            && self.referenced_table == other.referenced_table
            && self.referenced_columns == other.referenced_columns
            && self.on_delete == other.on_delete
            && self.on_update == other.on_update
    }
}

/// A unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseUniqueConstraint {
    /// Constraint name.
    pub name: String,
    /// Constrained columns.
    pub columns: Vec<String>,
}

/// An index, live or target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseIndex {
    /// Index name.
    pub name: String,
    /// Indexed table.
    pub table: String,
    /// Indexed columns, in key order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

impl DatabaseIndex {
    /// Whether two indexes have the same shape.
    pub fn same_definition(&self, other: &Self) -> bool {
        self.columns == other.columns && self.unique == other.unique
    }
}

/// A live enum type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseEnum {
    /// Type name.
    pub name: String,
    /// Values in sort order.
    pub values: Vec<String>,
}

/// A live view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseView {
    /// View name.
    pub name: String,
}

/// Deterministic foreign key name: `fk_<table>_<columns>_<referencedTable>`.
pub fn foreign_key_name(table: &str, columns: &[String], referenced_table: &str) -> String {
    format!("fk_{}_{}_{}", table, columns.join("_"), referenced_table)
}

/// Which tables introspection skips.
#[derive(Debug, Clone)]
pub struct IntrospectionConfig {
    /// Exact table names to skip.
    pub exclude_tables: Vec<String>,
    /// Name prefixes to skip.
    pub exclude_prefixes: Vec<String>,
}

impl Default for IntrospectionConfig {
    fn default() -> Self {
        Self {
            exclude_tables: vec![
                crate::config::DEFAULT_HISTORY_TABLE.to_string(),
                crate::config::DEFAULT_LOCK_TABLE.to_string(),
            ],
            exclude_prefixes: vec!["sqlite_".to_string()],
        }
    }
}

impl IntrospectionConfig {
    /// Skip exactly these bookkeeping tables plus SQLite internals.
    pub fn excluding<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exclude_tables: tables.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Check if a table should be reported.
    pub fn should_include_table(&self, name: &str) -> bool {
        !self.exclude_tables.iter().any(|t| t == name)
            && !self.exclude_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }
}

/// The result of one introspection pass.
#[derive(Debug, Clone)]
pub struct Introspection {
    /// The snapshot.
    pub schema: DatabaseSchema,
    /// SQLite library version, when the probe answered.
    pub sqlite_version: Option<String>,
    /// Where constraint information came from.
    pub source: CatalogSource,
}

/// Reads a [`DatabaseSchema`] from a live database.
pub struct Introspector<'a> {
    db: &'a dyn Database,
    config: IntrospectionConfig,
}

impl<'a> Introspector<'a> {
    /// Create an introspector over a database handle.
    pub fn new(db: &'a dyn Database, config: IntrospectionConfig) -> Self {
        Self { db, config }
    }

    /// Ask for the SQLite library version. `None` means this is not SQLite.
    pub async fn probe_sqlite_version(&self) -> Option<String> {
        let rows = self
            .db
            .query("select sqlite_version() as version")
            .await
            .ok()?;
        rows.first().and_then(|row| row_str(row, "version"))
    }

    /// Read the whole structure. The catalog path is chosen once, here.
    pub async fn introspect(&self, dialect: Dialect) -> MigrateResult<Introspection> {
        let sqlite_version = self.probe_sqlite_version().await;
        self.read(dialect, sqlite_version).await.map_err(|e| match e {
            MigrationError::Introspection(_) => e,
            other => MigrationError::introspection(other.to_string()),
        })
    }

    async fn read(
        &self,
        dialect: Dialect,
        sqlite_version: Option<String>,
    ) -> MigrateResult<Introspection> {
        let metadata = self.db.tables().await?;

        let mut views = Vec::new();
        let mut tables = Vec::new();
        for table in metadata {
            if !self.config.should_include_table(&table.name) {
                continue;
            }
            if table.is_view {
                views.push(DatabaseView { name: table.name });
            } else {
                tables.push(table);
            }
        }

        let (source, mut tables, enums) = match (&sqlite_version, dialect) {
            (Some(_), _) => (
                CatalogSource::SqlitePragma,
                self.read_sqlite(&tables).await?,
                vec![],
            ),
            (None, Dialect::Postgres) => {
                let (tables, enums) = self.read_postgres(&tables).await?;
                (CatalogSource::PostgresCatalog, tables, enums)
            }
            (None, Dialect::MySql) => (
                CatalogSource::MysqlCatalog,
                self.read_mysql(&tables).await?,
                vec![],
            ),
            (None, Dialect::Sqlite) => (
                CatalogSource::Generic,
                tables.iter().map(generic_table).collect(),
                vec![],
            ),
        };

        resolve_implicit_references(&mut tables);

        let indexes = tables.iter().flat_map(|t| t.indexes.clone()).collect();

        Ok(Introspection {
            schema: DatabaseSchema {
                tables,
                views,
                indexes,
                enums,
            },
            sqlite_version,
            source,
        })
    }

    async fn read_sqlite(&self, metadata: &[TableMetadata]) -> MigrateResult<Vec<DatabaseTable>> {
        let mut tables = Vec::with_capacity(metadata.len());

        for meta in metadata {
            let name = &meta.name;
            let quoted = Dialect::Sqlite.quote(name);

            let column_rows = self
                .db
                .query(&format!("PRAGMA table_info({quoted})"))
                .await?;

            let mut pk: Vec<(i64, String)> = Vec::new();
            let mut columns = Vec::with_capacity(column_rows.len());
            for row in &column_rows {
                let column_name = required(row, "name", "table_info")?;
                let data_type = row_str(row, "type").unwrap_or_default();
                let pk_position = row_i64(row, "pk").unwrap_or(0);
                let default_value = row_str(row, "dflt_value");
                if pk_position > 0 {
                    pk.push((pk_position, column_name.clone()));
                }
                columns.push(DatabaseColumn {
                    name: column_name,
                    nullable: !row_bool(row, "notnull"),
                    has_default: default_value.is_some(),
                    default_value,
                    auto_increment: false,
                    data_type,
                });
            }
            pk.sort_by_key(|(position, _)| *position);
            let primary_key: Vec<String> = pk.into_iter().map(|(_, c)| c).collect();

            // A lone INTEGER PRIMARY KEY aliases the rowid.
            if let [only] = primary_key.as_slice() {
                if let Some(column) = columns.iter_mut().find(|c| &c.name == only) {
                    column.auto_increment = column.data_type.eq_ignore_ascii_case("integer");
                }
            }

            let mut indexes = Vec::new();
            let mut unique_constraints = Vec::new();
            for row in self
                .db
                .query(&format!("PRAGMA index_list({quoted})"))
                .await?
            {
                let origin = row_str(&row, "origin").unwrap_or_else(|| "c".to_string());
                if origin == "pk" {
                    continue;
                }
                let index_name = required(&row, "name", "index_list")?;
                let unique = row_bool(&row, "unique");

                let mut info = self
                    .db
                    .query(&format!(
                        "PRAGMA index_info({})",
                        Dialect::Sqlite.quote(&index_name)
                    ))
                    .await?;
                info.sort_by_key(|r| row_i64(r, "seqno").unwrap_or(0));
                let index_columns: Vec<String> =
                    info.iter().filter_map(|r| row_str(r, "name")).collect();

                if origin == "u" {
                    unique_constraints.push(DatabaseUniqueConstraint {
                        name: index_name.clone(),
                        columns: index_columns.clone(),
                    });
                }
                indexes.push(DatabaseIndex {
                    name: index_name,
                    table: name.clone(),
                    columns: index_columns,
                    unique,
                });
            }
            indexes.sort_by(|a, b| a.name.cmp(&b.name));

            let fk_rows = self
                .db
                .query(&format!("PRAGMA foreign_key_list({quoted})"))
                .await?;
            let mut grouped: IndexMap<i64, Vec<&Row>> = IndexMap::new();
            for row in &fk_rows {
                grouped
                    .entry(row_i64(row, "id").unwrap_or(0))
                    .or_default()
                    .push(row);
            }
            let mut foreign_keys = Vec::with_capacity(grouped.len());
            for (_, mut rows) in grouped {
                rows.sort_by_key(|r| row_i64(r, "seq").unwrap_or(0));
                let first = rows[0];
                let referenced_table = required(first, "table", "foreign_key_list")?;
                let fk_columns: Vec<String> =
                    rows.iter().filter_map(|r| row_str(r, "from")).collect();
                let referenced_columns: Vec<String> =
                    rows.iter().filter_map(|r| row_str(r, "to")).collect();
                foreign_keys.push(DatabaseForeignKey {
                    name: foreign_key_name(name, &fk_columns, &referenced_table),
                    columns: fk_columns,
                    referenced_table,
                    referenced_columns,
                    on_delete: parse_action(row_str(first, "on_delete").as_deref()),
                    on_update: parse_action(row_str(first, "on_update").as_deref()),
                });
            }

            tables.push(DatabaseTable {
                name: name.clone(),
                columns,
                primary_key,
                foreign_keys,
                unique_constraints,
                indexes,
            });
        }

        Ok(tables)
    }

    async fn read_postgres(
        &self,
        metadata: &[TableMetadata],
    ) -> MigrateResult<(Vec<DatabaseTable>, Vec<DatabaseEnum>)> {
        let mut tables = seed_tables(metadata);

        let column_rows = self.db.query(postgres_queries::COLUMNS).await?;
        let mut catalog_columns: IndexMap<String, Vec<DatabaseColumn>> = IndexMap::new();
        for row in &column_rows {
            let table = required(row, "table_name", "columns")?;
            let data_type = row_str(row, "data_type").unwrap_or_default();
            let udt = row_str(row, "udt_name").unwrap_or_default();
            let native = match data_type.as_str() {
                "USER-DEFINED" => udt,
                "ARRAY" => format!("{}[]", udt.trim_start_matches('_')),
                _ => data_type,
            };
            let default_value = row_str(row, "column_default");
            let identity = row_str(row, "is_identity").is_some_and(|v| v == "YES");
            catalog_columns.entry(table).or_default().push(DatabaseColumn {
                name: required(row, "column_name", "columns")?,
                data_type: native,
                nullable: row_str(row, "is_nullable").is_some_and(|v| v == "YES"),
                auto_increment: identity
                    || default_value
                        .as_deref()
                        .is_some_and(|d| d.starts_with("nextval(")),
                has_default: default_value.is_some() || identity,
                default_value,
            });
        }
        replace_columns(&mut tables, catalog_columns);

        for row in self.db.query(postgres_queries::PRIMARY_KEYS).await? {
            let table = required(&row, "table_name", "primary keys")?;
            if let Some(t) = tables.get_mut(&table) {
                t.primary_key.push(required(&row, "column_name", "primary keys")?);
            }
        }

        for row in self.db.query(postgres_queries::FOREIGN_KEYS).await? {
            let table = required(&row, "table_name", "foreign keys")?;
            if let Some(t) = tables.get_mut(&table) {
                t.foreign_keys.push(DatabaseForeignKey {
                    name: required(&row, "name", "foreign keys")?,
                    columns: split_list(row_str(&row, "columns")),
                    referenced_table: required(&row, "referenced_table", "foreign keys")?,
                    referenced_columns: split_list(row_str(&row, "referenced_columns")),
                    on_delete: parse_pg_action(row_str(&row, "on_delete").as_deref()),
                    on_update: parse_pg_action(row_str(&row, "on_update").as_deref()),
                });
            }
        }

        for row in self.db.query(postgres_queries::INDEXES).await? {
            let table = required(&row, "table_name", "indexes")?;
            if let Some(t) = tables.get_mut(&table) {
                let index = DatabaseIndex {
                    name: required(&row, "index_name", "indexes")?,
                    table: table.clone(),
                    columns: split_list(row_str(&row, "columns")),
                    unique: row_bool(&row, "is_unique"),
                };
                if row_bool(&row, "is_constraint") {
                    t.unique_constraints.push(DatabaseUniqueConstraint {
                        name: index.name.clone(),
                        columns: index.columns.clone(),
                    });
                }
                t.indexes.push(index);
            }
        }

        let mut enums: IndexMap<String, Vec<String>> = IndexMap::new();
        for row in self.db.query(postgres_queries::ENUMS).await? {
            let name = required(&row, "name", "enums")?;
            let value = required(&row, "value", "enums")?;
            enums.entry(name).or_default().push(value);
        }

        Ok((
            tables.into_values().collect(),
            enums
                .into_iter()
                .map(|(name, values)| DatabaseEnum { name, values })
                .collect(),
        ))
    }

    async fn read_mysql(&self, metadata: &[TableMetadata]) -> MigrateResult<Vec<DatabaseTable>> {
        let mut tables = seed_tables(metadata);

        let mut catalog_columns: IndexMap<String, Vec<DatabaseColumn>> = IndexMap::new();
        for row in self.db.query(mysql_queries::COLUMNS).await? {
            let table = required(&row, "table_name", "columns")?;
            let default_value = row_str(&row, "column_default");
            let extra = row_str(&row, "extra").unwrap_or_default().to_ascii_lowercase();
            catalog_columns.entry(table).or_default().push(DatabaseColumn {
                name: required(&row, "column_name", "columns")?,
                data_type: row_str(&row, "column_type").unwrap_or_default(),
                nullable: row_str(&row, "is_nullable").is_some_and(|v| v == "YES"),
                has_default: default_value.is_some(),
                default_value,
                auto_increment: extra.contains("auto_increment"),
            });
        }
        replace_columns(&mut tables, catalog_columns);

        for row in self.db.query(mysql_queries::PRIMARY_KEYS).await? {
            let table = required(&row, "table_name", "primary keys")?;
            if let Some(t) = tables.get_mut(&table) {
                t.primary_key.push(required(&row, "column_name", "primary keys")?);
            }
        }

        let mut fks: IndexMap<(String, String), DatabaseForeignKey> = IndexMap::new();
        for row in self.db.query(mysql_queries::FOREIGN_KEYS).await? {
            let table = required(&row, "table_name", "foreign keys")?;
            let name = required(&row, "name", "foreign keys")?;
            let fk = fks
                .entry((table, name.clone()))
                .or_insert_with(|| DatabaseForeignKey {
                    name,
                    columns: vec![],
                    referenced_table: row_str(&row, "referenced_table").unwrap_or_default(),
                    referenced_columns: vec![],
                    on_delete: parse_action(row_str(&row, "on_delete").as_deref()),
                    on_update: parse_action(row_str(&row, "on_update").as_deref()),
                });
            fk.columns.extend(row_str(&row, "column_name"));
            fk.referenced_columns
                .extend(row_str(&row, "referenced_column"));
        }
        for ((table, _), fk) in fks {
            if let Some(t) = tables.get_mut(&table) {
                t.foreign_keys.push(fk);
            }
        }

        let mut indexes: IndexMap<(String, String), DatabaseIndex> = IndexMap::new();
        for row in self.db.query(mysql_queries::INDEXES).await? {
            let table = required(&row, "table_name", "indexes")?;
            let name = required(&row, "index_name", "indexes")?;
            let index = indexes
                .entry((table.clone(), name.clone()))
                .or_insert_with(|| DatabaseIndex {
                    name,
                    table,
                    columns: vec![],
                    unique: !row_bool(&row, "non_unique"),
                });
            index.columns.extend(row_str(&row, "column_name"));
        }
        for ((table, _), index) in indexes {
            if let Some(t) = tables.get_mut(&table) {
                // InnoDB backs every foreign key with an index of the same name.
                if t.foreign_keys.iter().any(|fk| fk.name == index.name) {
                    continue;
                }
                t.indexes.push(index);
            }
        }

        Ok(tables.into_values().collect())
    }
}

/// Tables from generic metadata, primary key guessed from
/// auto-increment flags or a column called `id`.
fn generic_table(meta: &TableMetadata) -> DatabaseTable {
    let columns: Vec<DatabaseColumn> = meta.columns.iter().map(column_from_metadata).collect();
    let primary_key = columns
        .iter()
        .filter(|c| c.auto_increment || c.name == "id")
        .map(|c| c.name.clone())
        .collect();

    DatabaseTable {
        name: meta.name.clone(),
        columns,
        primary_key,
        ..Default::default()
    }
}

fn column_from_metadata(meta: &crate::database::ColumnMetadata) -> DatabaseColumn {
    DatabaseColumn {
        name: meta.name.clone(),
        data_type: meta.data_type.clone(),
        nullable: meta.is_nullable,
        default_value: meta.default_value.clone(),
        has_default: meta.has_default_value || meta.default_value.is_some(),
        auto_increment: meta.is_auto_incrementing,
    }
}

fn seed_tables(metadata: &[TableMetadata]) -> IndexMap<String, DatabaseTable> {
    metadata
        .iter()
        .map(|meta| {
            (
                meta.name.clone(),
                DatabaseTable {
                    name: meta.name.clone(),
                    columns: meta.columns.iter().map(column_from_metadata).collect(),
                    ..Default::default()
                },
            )
        })
        .collect()
}

fn replace_columns(
    tables: &mut IndexMap<String, DatabaseTable>,
    catalog: IndexMap<String, Vec<DatabaseColumn>>,
) {
    for (name, columns) in catalog {
        if let Some(table) = tables.get_mut(&name) {
            table.columns = columns;
        }
    }
}

/// Fill in referenced columns SQLite leaves blank when a key points at the
/// parent's primary key implicitly.
fn resolve_implicit_references(tables: &mut [DatabaseTable]) {
    let primary_keys: IndexMap<String, Vec<String>> = tables
        .iter()
        .map(|t| (t.name.clone(), t.primary_key.clone()))
        .collect();

    for table in tables.iter_mut() {
        for fk in &mut table.foreign_keys {
            if fk.referenced_columns.is_empty() {
                if let Some(pk) = primary_keys.get(&fk.referenced_table) {
                    fk.referenced_columns = pk.clone();
                }
            }
        }
    }
}

fn required(row: &Row, column: &str, source: &str) -> MigrateResult<String> {
    row_str(row, column).ok_or_else(|| {
        MigrationError::introspection(format!("{source} row is missing `{column}`"))
    })
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Normalize a textual referential action; anything unrecognized is NO ACTION.
pub fn parse_action(value: Option<&str>) -> ReferentialAction {
    value
        .and_then(ReferentialAction::from_str)
        .unwrap_or(ReferentialAction::NoAction)
}

fn parse_pg_action(code: Option<&str>) -> ReferentialAction {
    match code {
        Some("c") => ReferentialAction::Cascade,
        Some("n") => ReferentialAction::SetNull,
        Some("d") => ReferentialAction::SetDefault,
        Some("r") => ReferentialAction::Restrict,
        _ => ReferentialAction::NoAction,
    }
}

/// PostgreSQL catalog queries, scoped to `current_schema()`.
pub mod postgres_queries {
    /// Columns with native and user-defined type names.
    pub const COLUMNS: &str = r#"
        SELECT
            table_name,
            column_name,
            data_type,
            udt_name,
            is_nullable,
            is_identity,
            column_default
        FROM information_schema.columns
        WHERE table_schema = current_schema()
        ORDER BY table_name, ordinal_position
    "#;

    /// Primary key columns in key order.
    pub const PRIMARY_KEYS: &str = r#"
        SELECT
            tc.table_name,
            kcu.column_name
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
            AND tc.table_name = kcu.table_name
        WHERE tc.constraint_type = 'PRIMARY KEY'
            AND tc.table_schema = current_schema()
        ORDER BY tc.table_name, kcu.ordinal_position
    "#;

    /// Foreign keys with ordered column lists and action codes.
    pub const FOREIGN_KEYS: &str = r#"
        SELECT
            con.conname AS name,
            cl.relname AS table_name,
            ref.relname AS referenced_table,
            array_to_string(ARRAY(
                SELECT a.attname
                FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
                JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
                ORDER BY k.ord
            ), ',') AS columns,
            array_to_string(ARRAY(
                SELECT a.attname
                FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
                JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
                ORDER BY k.ord
            ), ',') AS referenced_columns,
            con.confdeltype::text AS on_delete,
            con.confupdtype::text AS on_update
        FROM pg_constraint con
        JOIN pg_class cl ON cl.oid = con.conrelid
        JOIN pg_class ref ON ref.oid = con.confrelid
        JOIN pg_namespace n ON n.oid = cl.relnamespace
        WHERE con.contype = 'f'
            AND n.nspname = current_schema()
        ORDER BY cl.relname, con.conname
    "#;

    /// Non-primary indexes, flagged when they back a UNIQUE constraint.
    pub const INDEXES: &str = r#"
        SELECT
            t.relname AS table_name,
            i.relname AS index_name,
            ix.indisunique AS is_unique,
            array_to_string(ARRAY(
                SELECT a.attname
                FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
                JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
                ORDER BY k.ord
            ), ',') AS columns,
            EXISTS (
                SELECT 1 FROM pg_constraint c
                WHERE c.conindid = ix.indexrelid AND c.contype = 'u'
            ) AS is_constraint
        FROM pg_index ix
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        WHERE n.nspname = current_schema()
            AND NOT ix.indisprimary
        ORDER BY t.relname, i.relname
    "#;

    /// Enum labels in sort order.
    pub const ENUMS: &str = r#"
        SELECT
            t.typname AS name,
            e.enumlabel AS value
        FROM pg_type t
        JOIN pg_enum e ON e.enumtypid = t.oid
        JOIN pg_namespace n ON n.oid = t.typnamespace
        WHERE n.nspname = current_schema()
        ORDER BY t.typname, e.enumsortorder
    "#;
}

/// MySQL `information_schema` queries, scoped to `DATABASE()`.
pub mod mysql_queries {
    /// Columns with full column types.
    pub const COLUMNS: &str = r#"
        SELECT
            TABLE_NAME AS table_name,
            COLUMN_NAME AS column_name,
            COLUMN_TYPE AS column_type,
            IS_NULLABLE AS is_nullable,
            COLUMN_DEFAULT AS column_default,
            EXTRA AS extra
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA = DATABASE()
        ORDER BY TABLE_NAME, ORDINAL_POSITION
    "#;

    /// Primary key columns in key order.
    pub const PRIMARY_KEYS: &str = r#"
        SELECT
            TABLE_NAME AS table_name,
            COLUMN_NAME AS column_name
        FROM information_schema.KEY_COLUMN_USAGE
        WHERE TABLE_SCHEMA = DATABASE()
            AND CONSTRAINT_NAME = 'PRIMARY'
        ORDER BY TABLE_NAME, ORDINAL_POSITION
    "#;

    /// Foreign key columns, one row per column.
    pub const FOREIGN_KEYS: &str = r#"
        SELECT
            k.CONSTRAINT_NAME AS name,
            k.TABLE_NAME AS table_name,
            k.COLUMN_NAME AS column_name,
            k.REFERENCED_TABLE_NAME AS referenced_table,
            k.REFERENCED_COLUMN_NAME AS referenced_column,
            r.DELETE_RULE AS on_delete,
            r.UPDATE_RULE AS on_update
        FROM information_schema.KEY_COLUMN_USAGE k
        JOIN information_schema.REFERENTIAL_CONSTRAINTS r
            ON r.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA
            AND r.CONSTRAINT_NAME = k.CONSTRAINT_NAME
        WHERE k.TABLE_SCHEMA = DATABASE()
            AND k.REFERENCED_TABLE_NAME IS NOT NULL
        ORDER BY k.TABLE_NAME, k.CONSTRAINT_NAME, k.ORDINAL_POSITION
    "#;

    /// Index columns, one row per column.
    pub const INDEXES: &str = r#"
        SELECT
            TABLE_NAME AS table_name,
            INDEX_NAME AS index_name,
            NON_UNIQUE AS non_unique,
            COLUMN_NAME AS column_name
        FROM information_schema.STATISTICS
        WHERE TABLE_SCHEMA = DATABASE()
            AND INDEX_NAME <> 'PRIMARY'
        ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX
    "#;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ColumnMetadata;
    use crate::testing::MemoryDatabase;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn column(name: &str, ty: &str, nullable: bool, auto: bool) -> ColumnMetadata {
        ColumnMetadata {
            name: name.into(),
            data_type: ty.into(),
            is_nullable: nullable,
            is_auto_incrementing: auto,
            ..Default::default()
        }
    }

    #[test]
    fn test_should_include_table() {
        let config = IntrospectionConfig::default();
        assert!(!config.should_include_table("_reconcile_migrations"));
        assert!(!config.should_include_table("_reconcile_migration_locks"));
        assert!(!config.should_include_table("sqlite_sequence"));
        assert!(config.should_include_table("User"));

        let custom = IntrospectionConfig::excluding(["history"]);
        assert!(!custom.should_include_table("history"));
        assert!(custom.should_include_table("_reconcile_migrations"));
    }

    #[test]
    fn test_foreign_key_name() {
        assert_eq!(
            foreign_key_name("Post", &["authorId".into()], "User"),
            "fk_Post_authorId_User"
        );
        assert_eq!(
            foreign_key_name("M", &["a".into(), "b".into()], "G"),
            "fk_M_a_b_G"
        );
    }

    #[test]
    fn test_parse_actions() {
        assert_eq!(parse_action(Some("CASCADE")), ReferentialAction::Cascade);
        assert_eq!(parse_action(Some("SET NULL")), ReferentialAction::SetNull);
        assert_eq!(parse_action(None), ReferentialAction::NoAction);
        assert_eq!(parse_pg_action(Some("r")), ReferentialAction::Restrict);
        assert_eq!(parse_pg_action(Some("a")), ReferentialAction::NoAction);
    }

    #[tokio::test]
    async fn test_generic_introspection_heuristics() {
        let db = MemoryDatabase::new();
        db.add_table(TableMetadata {
            name: "User".into(),
            is_view: false,
            columns: vec![
                column("id", "integer", false, false),
                column("email", "text", true, false),
            ],
        });
        db.add_table(TableMetadata {
            name: "Counter".into(),
            is_view: false,
            columns: vec![column("seq", "integer", false, true)],
        });
        db.add_table(TableMetadata {
            name: "active_users".into(),
            is_view: true,
            columns: vec![],
        });
        db.add_table(TableMetadata {
            name: "_reconcile_migrations".into(),
            is_view: false,
            columns: vec![column("id", "text", false, false)],
        });

        let introspector = Introspector::new(&db, IntrospectionConfig::default());
        let result = introspector.introspect(Dialect::Sqlite).await.unwrap();

        assert_eq!(result.source, CatalogSource::Generic);
        assert_eq!(result.sqlite_version, None);
        assert_eq!(result.schema.tables.len(), 2);
        assert_eq!(result.schema.views, vec![DatabaseView { name: "active_users".into() }]);

        let user = result.schema.get_table("User").unwrap();
        assert_eq!(user.primary_key, vec!["id"]);
        assert!(user.get_column("email").unwrap().nullable);
        let counter = result.schema.get_table("Counter").unwrap();
        assert_eq!(counter.primary_key, vec!["seq"]);
    }

    #[tokio::test]
    async fn test_sqlite_pragma_introspection() {
        let db = MemoryDatabase::new();
        db.add_table(TableMetadata {
            name: "Post".into(),
            is_view: false,
            columns: vec![],
        });
        db.respond("select sqlite_version() as version", vec![json!({"version": "3.45.0"})]);
        db.respond(
            "PRAGMA table_info(\"Post\")",
            vec![
                json!({"cid": 0, "name": "id", "type": "integer", "notnull": 1, "dflt_value": null, "pk": 1}),
                json!({"cid": 1, "name": "title", "type": "text", "notnull": 0, "dflt_value": "'untitled'", "pk": 0}),
                json!({"cid": 2, "name": "authorId", "type": "integer", "notnull": 1, "dflt_value": null, "pk": 0}),
            ],
        );
        db.respond(
            "PRAGMA index_list(\"Post\")",
            vec![
                json!({"seq": 0, "name": "uniq_Post_title", "unique": 1, "origin": "c", "partial": 0}),
                json!({"seq": 1, "name": "sqlite_autoindex_Post_1", "unique": 1, "origin": "pk", "partial": 0}),
            ],
        );
        db.respond(
            "PRAGMA index_info(\"uniq_Post_title\")",
            vec![json!({"seqno": 0, "cid": 1, "name": "title"})],
        );
        db.respond(
            "PRAGMA foreign_key_list(\"Post\")",
            vec![json!({
                "id": 0, "seq": 0, "table": "User", "from": "authorId", "to": "id",
                "on_update": "NO ACTION", "on_delete": "CASCADE", "match": "NONE"
            })],
        );

        let introspector = Introspector::new(&db, IntrospectionConfig::default());
        let result = introspector.introspect(Dialect::Sqlite).await.unwrap();
        assert_eq!(result.source, CatalogSource::SqlitePragma);
        assert_eq!(result.sqlite_version.as_deref(), Some("3.45.0"));

        let post = result.schema.get_table("Post").unwrap();
        assert_eq!(post.primary_key, vec!["id"]);
        assert!(post.get_column("id").unwrap().auto_increment);
        let title = post.get_column("title").unwrap();
        assert!(title.nullable);
        assert_eq!(title.default_value.as_deref(), Some("'untitled'"));
        assert_eq!(
            post.indexes,
            vec![DatabaseIndex {
                name: "uniq_Post_title".into(),
                table: "Post".into(),
                columns: vec!["title".into()],
                unique: true,
            }]
        );
        assert_eq!(
            post.foreign_keys,
            vec![DatabaseForeignKey {
                name: "fk_Post_authorId_User".into(),
                columns: vec!["authorId".into()],
                referenced_table: "User".into(),
                referenced_columns: vec!["id".into()],
                on_delete: ReferentialAction::Cascade,
                on_update: ReferentialAction::NoAction,
            }]
        );
        assert_eq!(result.schema.indexes.len(), 1);
    }

    #[tokio::test]
    async fn test_introspection_failure_is_wrapped() {
        let db = MemoryDatabase::new();
        db.fail_metadata("connection reset");

        let introspector = Introspector::new(&db, IntrospectionConfig::default());
        let err = introspector.introspect(Dialect::Postgres).await.unwrap_err();
        assert!(matches!(err, MigrationError::Introspection(_)));
        assert!(err.to_string().starts_with("Failed to introspect database: "));
    }

    #[tokio::test]
    async fn test_postgres_catalog_introspection() {
        let db = MemoryDatabase::new();
        db.add_table(TableMetadata {
            name: "Post".into(),
            is_view: false,
            columns: vec![],
        });
        db.respond(
            postgres_queries::COLUMNS,
            vec![
                json!({"table_name": "Post", "column_name": "id", "data_type": "integer", "udt_name": "int4",
                       "is_nullable": "NO", "is_identity": "NO", "column_default": "nextval('\"Post_id_seq\"'::regclass)"}),
                json!({"table_name": "Post", "column_name": "status", "data_type": "USER-DEFINED", "udt_name": "Status",
                       "is_nullable": "NO", "is_identity": "NO", "column_default": null}),
                json!({"table_name": "Post", "column_name": "tags", "data_type": "ARRAY", "udt_name": "_text",
                       "is_nullable": "YES", "is_identity": "NO", "column_default": null}),
            ],
        );
        db.respond(
            postgres_queries::PRIMARY_KEYS,
            vec![json!({"table_name": "Post", "column_name": "id"})],
        );
        db.respond(
            postgres_queries::FOREIGN_KEYS,
            vec![json!({"name": "fk_Post_authorId_User", "table_name": "Post", "referenced_table": "User",
                        "columns": "authorId", "referenced_columns": "id", "on_delete": "c", "on_update": "a"})],
        );
        db.respond(
            postgres_queries::INDEXES,
            vec![json!({"table_name": "Post", "index_name": "uniq_Post_slug", "is_unique": true,
                        "columns": "slug", "is_constraint": false})],
        );
        db.respond(
            postgres_queries::ENUMS,
            vec![
                json!({"name": "Status", "value": "DRAFT"}),
                json!({"name": "Status", "value": "PUBLISHED"}),
            ],
        );

        let introspector = Introspector::new(&db, IntrospectionConfig::default());
        let result = introspector.introspect(Dialect::Postgres).await.unwrap();
        assert_eq!(result.source, CatalogSource::PostgresCatalog);

        let post = result.schema.get_table("Post").unwrap();
        assert!(post.get_column("id").unwrap().auto_increment);
        assert_eq!(post.get_column("status").unwrap().data_type, "Status");
        assert_eq!(post.get_column("tags").unwrap().data_type, "text[]");
        assert_eq!(post.primary_key, vec!["id"]);
        assert_eq!(post.foreign_keys[0].on_delete, ReferentialAction::Cascade);
        assert_eq!(post.indexes[0].name, "uniq_Post_slug");
        assert_eq!(
            result.schema.enums,
            vec![DatabaseEnum {
                name: "Status".into(),
                values: vec!["DRAFT".into(), "PUBLISHED".into()],
            }]
        );
    }
}
