//! SQL dialects: quoting, type mapping and ALTER capabilities.

use serde::{Deserialize, Serialize};

use reconcile_model::{DatabaseProvider, ScalarType, Schema};

/// The SQL backend a migration targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// PostgreSQL.
    #[default]
    Postgres,
    /// MySQL.
    MySql,
    /// SQLite.
    Sqlite,
}

impl Dialect {
    /// Pick the dialect from the schema's first datasource; PostgreSQL otherwise.
    pub fn from_schema(schema: &Schema) -> Self {
        match schema.provider() {
            Some(DatabaseProvider::MySQL) => Self::MySql,
            Some(DatabaseProvider::SQLite) => Self::Sqlite,
            Some(DatabaseProvider::PostgreSQL) | None => Self::Postgres,
        }
    }

    /// Lowercase dialect name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }

    /// Quote an identifier.
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", ident.replace('`', "``")),
            Self::Postgres | Self::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Quote and join a column list.
    pub fn quote_list(&self, idents: &[String]) -> String {
        idents
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Whether enums are standalone types (`CREATE TYPE ... AS ENUM`).
    pub fn supports_enum_types(&self) -> bool {
        matches!(self, Self::Postgres)
    }

    /// Whether foreign keys must be declared inside `CREATE TABLE`.
    pub fn requires_inline_foreign_keys(&self) -> bool {
        matches!(self, Self::Sqlite)
    }

    /// Whether `CREATE INDEX IF NOT EXISTS` is accepted.
    pub fn supports_create_index_if_not_exists(&self) -> bool {
        !matches!(self, Self::MySql)
    }

    /// Column type for a scalar.
    pub fn scalar_type(&self, scalar: ScalarType, auto_increment: bool) -> String {
        let ty = match (self, scalar) {
            (Self::Postgres, ScalarType::Int) if auto_increment => "serial",
            (Self::Postgres, ScalarType::BigInt) if auto_increment => "bigserial",
            (Self::Sqlite, ScalarType::Int | ScalarType::BigInt) if auto_increment => "integer",

            (Self::MySql, ScalarType::Int) => "int",
            (_, ScalarType::Int) => "integer",
            (_, ScalarType::BigInt) => "bigint",

            (Self::Postgres, ScalarType::Float) => "double precision",
            (Self::MySql, ScalarType::Float) => "double",
            (Self::Sqlite, ScalarType::Float) => "real",

            (Self::MySql, ScalarType::Decimal) => "decimal(65,30)",
            (_, ScalarType::Decimal) => "decimal",

            (Self::MySql, ScalarType::String) => "varchar(255)",
            (_, ScalarType::String) => "text",

            (_, ScalarType::Boolean) => "boolean",

            (Self::MySql, ScalarType::DateTime) => "datetime(3)",
            (_, ScalarType::DateTime) => "timestamp",

            (_, ScalarType::Date) => "date",
            (_, ScalarType::Time) => "time",

            (Self::Postgres, ScalarType::Json) => "jsonb",
            (_, ScalarType::Json) => "json",

            (Self::Postgres, ScalarType::Bytes) => "bytea",
            (Self::MySql, ScalarType::Bytes) => "longblob",
            (Self::Sqlite, ScalarType::Bytes) => "blob",

            (Self::Postgres, ScalarType::Uuid) => "uuid",
            (Self::MySql, ScalarType::Uuid) => "char(36)",
            (Self::Sqlite, ScalarType::Uuid) => "text",
        };
        ty.to_string()
    }

    /// Column type for a list of scalars.
    pub fn list_type(&self, scalar: ScalarType) -> String {
        match self {
            Self::Postgres => format!("{}[]", self.scalar_type(scalar, false)),
            Self::MySql | Self::Sqlite => "json".to_string(),
        }
    }

    /// Column type for an enum-typed field.
    pub fn enum_type(&self, db_name: &str, values: &[&str]) -> String {
        match self {
            Self::Postgres => self.quote(db_name),
            Self::MySql => format!(
                "enum({})",
                values
                    .iter()
                    .map(|v| quote_literal(v))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            Self::Sqlite => "text".to_string(),
        }
    }

    /// Comparable form of a type name, so that aliases and the spellings
    /// catalogs report back (`int4`, `timestamp without time zone`) match the
    /// spellings we emit.
    pub fn canonical_type(&self, raw: &str) -> String {
        let lowered = raw.trim().to_ascii_lowercase();
        if self == &Self::MySql && lowered == "tinyint(1)" {
            return "boolean".to_string();
        }

        let (base, is_array) = match lowered.strip_suffix("[]") {
            Some(base) => (base.trim(), true),
            None => (lowered.as_str(), false),
        };
        let unquoted = base.trim_matches('"');
        let stripped = strip_type_arguments(unquoted);

        let canonical = match stripped.as_str() {
            "int" | "int4" | "integer" | "serial" | "serial4" | "mediumint" => "integer",
            "int8" | "bigint" | "bigserial" | "serial8" => "bigint",
            "int2" | "smallint" | "tinyint" => "smallint",
            "bool" | "boolean" => "boolean",
            "float4" | "real" => "real",
            "float8" | "float" | "double" | "double precision" => "double precision",
            "numeric" | "decimal" => "decimal",
            "timestamp without time zone" | "timestamp" | "datetime" => "timestamp",
            "timestamp with time zone" | "timestamptz" => "timestamptz",
            "time without time zone" | "time" => "time",
            "character varying" | "varchar" => "varchar",
            "character" | "char" | "bpchar" => "char",
            other => other,
        }
        .to_string();

        if is_array {
            format!("{canonical}[]")
        } else {
            canonical
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a dialect can change in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialectCapabilities {
    /// `ALTER TABLE ... DROP COLUMN`.
    pub supports_drop_column: bool,
    /// `ALTER TABLE ... RENAME COLUMN`.
    pub supports_rename_column: bool,
    /// `ALTER TABLE ... ALTER COLUMN` (type, nullability, default).
    pub supports_alter_column: bool,
}

impl DialectCapabilities {
    /// Everything supported.
    pub const FULL: Self = Self {
        supports_drop_column: true,
        supports_rename_column: true,
        supports_alter_column: true,
    };

    /// Nothing supported; every column change goes through a rebuild.
    pub const REBUILD_ONLY: Self = Self {
        supports_drop_column: false,
        supports_rename_column: false,
        supports_alter_column: false,
    };

    /// Capabilities of a SQLite library version, e.g. `3.45.1`.
    pub fn sqlite(version: &str) -> Self {
        let v = parse_version(version);
        Self {
            supports_drop_column: v >= (3, 35, 0),
            supports_rename_column: v >= (3, 25, 0),
            supports_alter_column: false,
        }
    }

    /// Capabilities for a dialect when no probe result is available.
    pub fn for_dialect(dialect: Dialect, sqlite_version: Option<&str>) -> Self {
        match (dialect, sqlite_version) {
            (Dialect::Sqlite, Some(version)) => Self::sqlite(version),
            (Dialect::Sqlite, None) => Self::REBUILD_ONLY,
            (Dialect::Postgres | Dialect::MySql, _) => Self::FULL,
        }
    }
}

/// Parse `major.minor.patch`, treating missing or garbled parts as 0.
pub fn parse_version(version: &str) -> (u32, u32, u32) {
    let mut parts = version
        .trim()
        .split('.')
        .map(|p| {
            p.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse::<u32>()
                .unwrap_or(0)
        });
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

/// Render a single-quoted SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn strip_type_arguments(ty: &str) -> String {
    match (ty.find('('), ty.rfind(')')) {
        (Some(open), Some(close)) if close > open => {
            let mut out = String::with_capacity(ty.len());
            out.push_str(ty[..open].trim_end());
            out.push_str(&ty[close + 1..]);
            out.trim().to_string()
        }
        _ => ty.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile_model::Datasource;

    #[test]
    fn test_dialect_from_schema() {
        assert_eq!(Dialect::from_schema(&Schema::new()), Dialect::Postgres);
        let schema = Schema::new().with_datasource(Datasource::new("db", "sqlite"));
        assert_eq!(Dialect::from_schema(&schema), Dialect::Sqlite);
        let schema = Schema::new().with_datasource(Datasource::new("db", "cockroach"));
        assert_eq!(Dialect::from_schema(&schema), Dialect::Postgres);
    }

    #[test]
    fn test_quoting() {
        assert_eq!(Dialect::Postgres.quote("User"), "\"User\"");
        assert_eq!(Dialect::Sqlite.quote("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(Dialect::MySql.quote("order"), "`order`");
        assert_eq!(
            Dialect::Postgres.quote_list(&["a".into(), "b".into()]),
            "\"a\", \"b\""
        );
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_scalar_types() {
        assert_eq!(Dialect::Postgres.scalar_type(ScalarType::Int, true), "serial");
        assert_eq!(Dialect::Sqlite.scalar_type(ScalarType::BigInt, true), "integer");
        assert_eq!(Dialect::MySql.scalar_type(ScalarType::String, false), "varchar(255)");
        assert_eq!(Dialect::Sqlite.scalar_type(ScalarType::DateTime, false), "timestamp");
        assert_eq!(Dialect::Postgres.list_type(ScalarType::String), "text[]");
        assert_eq!(Dialect::MySql.enum_type("Role", &["A", "B"]), "enum('A','B')");
        assert_eq!(Dialect::Postgres.enum_type("Role", &["A"]), "\"Role\"");
    }

    #[test]
    fn test_canonical_type() {
        let pg = Dialect::Postgres;
        assert_eq!(pg.canonical_type("serial"), pg.canonical_type("integer"));
        assert_eq!(pg.canonical_type("timestamp without time zone"), "timestamp");
        assert_eq!(pg.canonical_type("NUMERIC(10, 2)"), "decimal");
        assert_eq!(pg.canonical_type("character varying(255)"), "varchar");
        assert_eq!(pg.canonical_type("_text[]"), "_text[]");
        assert_eq!(pg.canonical_type("text[]"), "text[]");
        assert_eq!(Dialect::MySql.canonical_type("tinyint(1)"), "boolean");
        assert_eq!(Dialect::MySql.canonical_type("datetime(3)"), "timestamp");
        assert_eq!(Dialect::Sqlite.canonical_type("TEXT"), "text");
    }

    #[test]
    fn test_sqlite_capabilities() {
        let old = DialectCapabilities::sqlite("3.24.0");
        assert!(!old.supports_drop_column);
        assert!(!old.supports_rename_column);

        let mid = DialectCapabilities::sqlite("3.31.1");
        assert!(!mid.supports_drop_column);
        assert!(mid.supports_rename_column);

        let new = DialectCapabilities::sqlite("3.46.0");
        assert!(new.supports_drop_column);
        assert!(!new.supports_alter_column);

        assert_eq!(
            DialectCapabilities::for_dialect(Dialect::Sqlite, None),
            DialectCapabilities::REBUILD_ONLY
        );
        assert_eq!(
            DialectCapabilities::for_dialect(Dialect::MySql, None),
            DialectCapabilities::FULL
        );
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("3.35.0"), (3, 35, 0));
        assert_eq!(parse_version("3.8"), (3, 8, 0));
        assert_eq!(parse_version("garbage"), (0, 0, 0));
    }
}
