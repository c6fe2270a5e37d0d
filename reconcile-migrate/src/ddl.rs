//! DDL statement generation.
//!
//! Every statement is a single line of dialect-native SQL. The shared
//! shapes live in [`DdlGenerator`]'s provided methods; the per-dialect
//! structs override only where the syntax diverges.

use reconcile_model::ReferentialAction;
use serde::{Deserialize, Serialize};

use crate::dialect::{Dialect, quote_literal};
use crate::introspect::{DatabaseForeignKey, DatabaseIndex};
use crate::target::{TargetColumn, TargetTable};

/// Statements that switch foreign key enforcement off around a table
/// rebuild and verify the references afterwards.
///
/// `disable` and `enable` only take effect outside a transaction, so the
/// executor runs them around the migration rather than inside it. `check`
/// returns one row per dangling reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyGuard {
    /// Query whose first column is non-zero while enforcement is on.
    pub status: String,
    pub disable: String,
    pub check: String,
    pub enable: String,
}

/// Produces DDL for one dialect.
pub trait DdlGenerator: Send + Sync {
    /// The dialect this generator writes.
    fn dialect(&self) -> Dialect;

    /// Quote an identifier.
    fn quote(&self, ident: &str) -> String {
        self.dialect().quote(ident)
    }

    /// Column definition as used in `CREATE TABLE` and `ADD COLUMN`.
    fn column_definition(&self, column: &TargetColumn, inline_primary_key: bool) -> String {
        let mut def = format!("{} {}", self.quote(&column.name), column.sql_type);
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = column.default.as_ref().and_then(|d| d.render(self.dialect())) {
            def.push_str(" DEFAULT ");
            def.push_str(&default);
        }
        if inline_primary_key {
            def.push_str(" PRIMARY KEY");
        }
        def
    }

    /// `CREATE TABLE`, with inline foreign keys where the dialect needs them.
    fn create_table(&self, table: &TargetTable) -> String {
        self.create_table_named(table, &table.name)
    }

    /// `CREATE TABLE` under a different name, used by rebuilds.
    fn create_table_named(&self, table: &TargetTable, name: &str) -> String {
        let single_pk = match table.primary_key.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        };

        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(c, single_pk == Some(c.name.as_str())))
            .collect();

        if table.primary_key.len() > 1 {
            parts.push(format!(
                "PRIMARY KEY ({})",
                self.dialect().quote_list(&table.primary_key)
            ));
        }

        if self.dialect().requires_inline_foreign_keys() {
            parts.extend(table.foreign_keys.iter().map(|fk| self.inline_foreign_key(fk)));
        }

        format!("CREATE TABLE {} ({})", self.quote(name), parts.join(", "))
    }

    /// `FOREIGN KEY (...) REFERENCES ...` clause.
    fn inline_foreign_key(&self, fk: &DatabaseForeignKey) -> String {
        let mut clause = format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            self.dialect().quote_list(&fk.columns),
            self.quote(&fk.referenced_table),
            self.dialect().quote_list(&fk.referenced_columns)
        );
        clause.push_str(&referential_actions(fk));
        clause
    }

    /// `DROP TABLE`.
    fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE {}", self.quote(table))
    }

    /// `ALTER TABLE ... ADD COLUMN`.
    fn add_column(&self, table: &str, column: &TargetColumn) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote(table),
            self.column_definition(column, false)
        )
    }

    /// `ALTER TABLE ... DROP COLUMN`.
    fn drop_column(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote(table),
            self.quote(column)
        )
    }

    /// Change a column's type.
    fn alter_column_type(&self, table: &str, column: &TargetColumn) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
            self.quote(table),
            self.quote(&column.name),
            column.sql_type
        )
    }

    /// Change a column's nullability.
    fn alter_column_nullability(&self, table: &str, column: &TargetColumn) -> String {
        let action = if column.nullable {
            "DROP NOT NULL"
        } else {
            "SET NOT NULL"
        };
        format!(
            "ALTER TABLE {} ALTER COLUMN {} {}",
            self.quote(table),
            self.quote(&column.name),
            action
        )
    }

    /// Change or drop a column's default.
    fn alter_column_default(&self, table: &str, column: &TargetColumn) -> String {
        let action = match column.default.as_ref().and_then(|d| d.render(self.dialect())) {
            Some(default) => format!("SET DEFAULT {default}"),
            None => "DROP DEFAULT".to_string(),
        };
        format!(
            "ALTER TABLE {} ALTER COLUMN {} {}",
            self.quote(table),
            self.quote(&column.name),
            action
        )
    }

    /// `CREATE [UNIQUE] INDEX`.
    fn create_index(&self, index: &DatabaseIndex) -> String {
        let unique = if index.unique { "UNIQUE " } else { "" };
        let if_not_exists = if self.dialect().supports_create_index_if_not_exists() {
            "IF NOT EXISTS "
        } else {
            ""
        };
        format!(
            "CREATE {}INDEX {}{} ON {} ({})",
            unique,
            if_not_exists,
            self.quote(&index.name),
            self.quote(&index.table),
            self.dialect().quote_list(&index.columns)
        )
    }

    /// `DROP INDEX`.
    fn drop_index(&self, index: &DatabaseIndex) -> String {
        format!("DROP INDEX {}", self.quote(&index.name))
    }

    /// `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY`.
    fn add_foreign_key(&self, table: &str, fk: &DatabaseForeignKey) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {}",
            self.quote(table),
            self.quote(&fk.name),
            self.inline_foreign_key(fk)
        )
    }

    /// `ALTER TABLE ... DROP CONSTRAINT`.
    fn drop_foreign_key(&self, table: &str, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote(table),
            self.quote(name)
        )
    }

    /// `CREATE TYPE ... AS ENUM`. Dialects without enum types return nothing.
    fn create_enum(&self, _name: &str, _values: &[String]) -> Option<String> {
        None
    }

    /// `ALTER TYPE ... ADD VALUE`.
    fn add_enum_value(&self, _name: &str, _value: &str) -> Option<String> {
        None
    }

    /// `DROP TYPE IF EXISTS`.
    fn drop_enum(&self, _name: &str) -> Option<String> {
        None
    }

    /// Recreate a table with the target structure, keeping the data of
    /// columns both structures share.
    fn rebuild_table(&self, table: &TargetTable, current_columns: &[String], suffix: &str) -> Vec<String> {
        let temp = format!("_reconcile_tmp_{}_{}", table.name, suffix);

        let common: Vec<String> = table
            .columns
            .iter()
            .filter(|c| current_columns.contains(&c.name))
            .map(|c| c.name.clone())
            .collect();

        let mut statements = vec![self.create_table_named(table, &temp)];
        if !common.is_empty() {
            let list = self.dialect().quote_list(&common);
            statements.push(format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                self.quote(&temp),
                list,
                list,
                self.quote(&table.name)
            ));
        }
        statements.push(self.drop_table(&table.name));
        statements.push(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote(&temp),
            self.quote(&table.name)
        ));
        statements.extend(table.indexes.iter().map(|index| self.create_index(index)));
        statements
    }

    /// How to keep a rebuild from firing the foreign keys of other tables.
    /// `None` when the dialect never rebuilds.
    fn foreign_key_guard(&self) -> Option<ForeignKeyGuard> {
        None
    }
}

fn referential_actions(fk: &DatabaseForeignKey) -> String {
    let mut out = String::new();
    if fk.on_delete != ReferentialAction::NoAction {
        out.push_str(" ON DELETE ");
        out.push_str(fk.on_delete.as_str());
    }
    if fk.on_update != ReferentialAction::NoAction {
        out.push_str(" ON UPDATE ");
        out.push_str(fk.on_update.as_str());
    }
    out
}

/// PostgreSQL DDL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDdl;

impl DdlGenerator for PostgresDdl {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn create_enum(&self, name: &str, values: &[String]) -> Option<String> {
        let values: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
        Some(format!(
            "CREATE TYPE {} AS ENUM ({})",
            self.quote(name),
            values.join(", ")
        ))
    }

    fn add_enum_value(&self, name: &str, value: &str) -> Option<String> {
        Some(format!(
            "ALTER TYPE {} ADD VALUE {}",
            self.quote(name),
            quote_literal(value)
        ))
    }

    fn drop_enum(&self, name: &str) -> Option<String> {
        Some(format!("DROP TYPE IF EXISTS {}", self.quote(name)))
    }
}

/// MySQL DDL.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDdl;

impl DdlGenerator for MySqlDdl {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn column_definition(&self, column: &TargetColumn, inline_primary_key: bool) -> String {
        let mut def = format!("{} {}", self.quote(&column.name), column.sql_type);
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if column.auto_increment {
            def.push_str(" AUTO_INCREMENT");
        } else if let Some(default) = column.default.as_ref().and_then(|d| d.render(Dialect::MySql)) {
            def.push_str(" DEFAULT ");
            def.push_str(&default);
        }
        if inline_primary_key {
            def.push_str(" PRIMARY KEY");
        }
        def
    }

    fn alter_column_type(&self, table: &str, column: &TargetColumn) -> String {
        format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            self.quote(table),
            self.column_definition(column, false)
        )
    }

    fn alter_column_nullability(&self, table: &str, column: &TargetColumn) -> String {
        self.alter_column_type(table, column)
    }

    fn drop_index(&self, index: &DatabaseIndex) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote(&index.name),
            self.quote(&index.table)
        )
    }

    fn drop_foreign_key(&self, table: &str, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP FOREIGN KEY {}",
            self.quote(table),
            self.quote(name)
        )
    }
}

/// SQLite DDL.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDdl;

impl DdlGenerator for SqliteDdl {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn column_definition(&self, column: &TargetColumn, inline_primary_key: bool) -> String {
        let mut def = format!("{} {}", self.quote(&column.name), column.sql_type);
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = column.default.as_ref().and_then(|d| d.render(Dialect::Sqlite)) {
            def.push_str(" DEFAULT ");
            def.push_str(&default);
        }
        if inline_primary_key {
            def.push_str(" PRIMARY KEY");
            if column.auto_increment {
                def.push_str(" AUTOINCREMENT");
            }
        }
        def
    }

    // Dropping the original table with enforcement on deletes its rows
    // first, which cascades into child tables or fails on their references.
    fn foreign_key_guard(&self) -> Option<ForeignKeyGuard> {
        Some(ForeignKeyGuard {
            status: "PRAGMA foreign_keys".to_string(),
            disable: "PRAGMA foreign_keys = OFF".to_string(),
            check: "PRAGMA foreign_key_check".to_string(),
            enable: "PRAGMA foreign_keys = ON".to_string(),
        })
    }
}

/// The generator for a dialect.
pub fn generator_for(dialect: Dialect) -> Box<dyn DdlGenerator> {
    match dialect {
        Dialect::Postgres => Box::new(PostgresDdl),
        Dialect::MySql => Box::new(MySqlDdl),
        Dialect::Sqlite => Box::new(SqliteDdl),
    }
}
