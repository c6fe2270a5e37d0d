//! Shared builders for the end-to-end tests.

#![allow(dead_code)]

use std::sync::Arc;

use reconcile::migrate::{
    CollectingObserver, Database, Dialect, MigrationConfig, MigrationEngine,
};
use reconcile::model::{
    Attribute, AttributeArgument, AttributeValue, Datasource, Field, FieldType, Model, ScalarType,
    Schema, TypeModifier,
};
use reconcile::sqlite::{SqliteConfig, SqliteDatabase};

/// `id Int @id @default(autoincrement())`
pub fn id() -> Field {
    Field::new("id", FieldType::Scalar(ScalarType::Int), TypeModifier::Required)
        .id()
        .default_value(AttributeValue::Function("autoincrement".into(), vec![]))
}

pub fn required(name: &str, ty: ScalarType) -> Field {
    Field::new(name, FieldType::Scalar(ty), TypeModifier::Required)
}

pub fn optional(name: &str, ty: ScalarType) -> Field {
    Field::new(name, FieldType::Scalar(ty), TypeModifier::Optional)
}

/// `name Target @relation(fields: [column], references: [id])`
pub fn belongs_to(name: &str, target: &str, column: &str) -> Field {
    relation(name, target, column, None)
}

/// `belongs_to` with an `onDelete` action such as `Cascade`.
pub fn belongs_to_on_delete(name: &str, target: &str, column: &str, action: &str) -> Field {
    relation(name, target, column, Some(action))
}

fn relation(name: &str, target: &str, column: &str, on_delete: Option<&str>) -> Field {
    let mut args = vec![
        AttributeArgument::named("fields", AttributeValue::FieldRefList(vec![column.into()])),
        AttributeArgument::named("references", AttributeValue::FieldRefList(vec!["id".into()])),
    ];
    if let Some(action) = on_delete {
        args.push(AttributeArgument::named("onDelete", AttributeValue::Ident(action.into())));
    }
    Field::new(name, FieldType::Model(target.into()), TypeModifier::Required)
        .with_attribute(Attribute::new("relation", args))
}

pub fn sqlite_schema(models: impl IntoIterator<Item = Model>) -> Schema {
    models
        .into_iter()
        .fold(Schema::new().with_datasource(Datasource::new("db", "sqlite")), |schema, model| {
            schema.with_model(model)
        })
}

/// `Account { id, email String @unique, nickname String? }`
pub fn account() -> Model {
    Model::new("Account")
        .with_field(id())
        .with_field(required("email", ScalarType::String).unique())
        .with_field(optional("nickname", ScalarType::String))
}

pub fn engine_for(
    db: &SqliteDatabase,
    config: MigrationConfig,
) -> (MigrationEngine<SqliteDatabase>, Arc<CollectingObserver>) {
    init_tracing();
    let observer = Arc::new(CollectingObserver::new());
    let engine = MigrationEngine::new(db.clone(), config)
        .unwrap()
        .with_dialect(Dialect::Sqlite)
        .with_observer(observer.clone());
    (engine, observer)
}

/// Route engine logs to the test harness. Set `RUST_LOG=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn memory_engine() -> (SqliteDatabase, MigrationEngine<SqliteDatabase>) {
    init_tracing();
    let db = SqliteDatabase::open(SqliteConfig::memory()).await.unwrap();
    let engine = MigrationEngine::new(db.clone(), MigrationConfig::default())
        .unwrap()
        .with_dialect(Dialect::Sqlite);
    (db, engine)
}

pub async fn table_names(db: &SqliteDatabase) -> Vec<String> {
    db.tables()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .filter(|name| !name.starts_with("_reconcile_migration"))
        .collect()
}

pub async fn column_names(db: &SqliteDatabase, table: &str) -> Vec<String> {
    db.tables()
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.name == table)
        .map(|t| t.columns.into_iter().map(|c| c.name).collect())
        .unwrap_or_default()
}
