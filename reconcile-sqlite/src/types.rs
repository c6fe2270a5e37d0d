//! Conversions between JSON rows and SQLite values.

use reconcile_migrate::Row;
use rusqlite::types::{Value, ValueRef};
use serde_json::Value as JsonValue;

/// Convert a JSON value to a SQLite value.
///
/// Booleans become 0/1. Arrays and objects are stored as JSON text.
pub fn to_sqlite_value(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Integer(i64::from(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

/// Convert a SQLite value to JSON.
///
/// Text that holds a JSON array or object is decoded back into one.
pub fn from_sqlite_value(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(bytes) => {
            let s = String::from_utf8_lossy(bytes).into_owned();
            if s.starts_with('[') || s.starts_with('{') {
                serde_json::from_str(&s).unwrap_or(JsonValue::String(s))
            } else {
                JsonValue::String(s)
            }
        }
        ValueRef::Blob(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Read a whole result row into a [`Row`].
pub fn row_to_json(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Row> {
    let mut map = Row::new();
    for (i, column) in columns.iter().enumerate() {
        map.insert(column.clone(), from_sqlite_value(row.get_ref(i)?));
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_sqlite_value() {
        assert_eq!(to_sqlite_value(&json!(null)), Value::Null);
        assert_eq!(to_sqlite_value(&json!(true)), Value::Integer(1));
        assert_eq!(to_sqlite_value(&json!(42)), Value::Integer(42));
        assert_eq!(to_sqlite_value(&json!(1.5)), Value::Real(1.5));
        assert_eq!(to_sqlite_value(&json!("x")), Value::Text("x".into()));
        assert_eq!(
            to_sqlite_value(&json!(["a", "b"])),
            Value::Text(r#"["a","b"]"#.into())
        );
    }

    #[test]
    fn test_from_sqlite_value() {
        assert_eq!(from_sqlite_value(ValueRef::Integer(7)), json!(7));
        assert_eq!(from_sqlite_value(ValueRef::Text(b"plain")), json!("plain"));
        assert_eq!(from_sqlite_value(ValueRef::Text(br#"["a"]"#)), json!(["a"]));
        assert_eq!(from_sqlite_value(ValueRef::Text(b"[not json")), json!("[not json"));
        assert_eq!(from_sqlite_value(ValueRef::Null), JsonValue::Null);
    }
}
