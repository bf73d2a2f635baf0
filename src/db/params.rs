//! Parameter preparation.
//!
//! All engine statements use `?` placeholders. Before binding, the SQL and
//! its arguments pass through [`expand_placeholders`], which rewrites any
//! [`Value::List`] argument into a parenthesized group of one placeholder
//! per element. PostgreSQL statements are then renumbered to `$1, $2, ...`.

use crate::error::{OrmError, OrmResult};
use crate::value::Value;

/// Expand list arguments and verify the placeholder/argument counts match.
/// A mismatch in either direction is a configuration error.
pub(crate) fn expand_placeholders(sql: &str, args: Vec<Value>) -> OrmResult<(String, Vec<Value>)> {
    let mut query = String::with_capacity(sql.len());
    let mut params: Vec<Value> = Vec::with_capacity(args.len());
    let mut consumed = 0usize;
    let mut args = args.into_iter();
    for ch in sql.chars() {
        if ch != '?' {
            query.push(ch);
            continue;
        }
        let arg = args.next().ok_or_else(|| {
            OrmError::config(format!(
                "The number of placeholders in query '{sql}' exceeds the number of parameters ({consumed})"
            ))
        })?;
        consumed += 1;
        match arg {
            Value::List(items) => {
                query.push('(');
                query.push_str(&vec!["?"; items.len()].join(", "));
                query.push(')');
                params.extend(items);
            }
            other => {
                query.push('?');
                params.push(other);
            }
        }
    }
    let leftover = args.count();
    if leftover > 0 {
        return Err(OrmError::config(format!(
            "The number of placeholders in query '{sql}' is less than the number of parameters ({})",
            consumed + leftover
        )));
    }
    Ok((query, params))
}

/// Rewrite `?` placeholders into the `$n` form PostgreSQL prepares.
pub(crate) fn numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0u32;
    for ch in sql.chars() {
        if ch == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(ch);
        }
    }
    out
}

// The three binders below are intentionally parallel; each adapts the same
// Value mapping to its backend's argument type.

pub(crate) fn bind_mysql<'q>(
    query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
    value: &Value,
) -> sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        // Bound as a float when parseable so numeric comparisons work; the
        // exact text survives decoding either way.
        Value::Decimal(v) => match v.parse::<f64>() {
            Ok(f) => query.bind(f),
            Err(_) => query.bind(v.clone()),
        },
        Value::Text(v) => query.bind(v.clone()),
        Value::Bytes(v) => query.bind(v.clone()),
        Value::Timestamp(v) => query.bind(*v),
        Value::Date(v) => query.bind(*v),
        Value::Time(v) => query.bind(*v),
        Value::Json(v) => query.bind(sqlx::types::Json(v.clone())),
        // Lists are expanded before binding; render defensively.
        Value::List(_) => query.bind(value.render()),
    }
}

pub(crate) fn bind_postgres<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    value: &Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Decimal(v) => match v.parse::<f64>() {
            Ok(f) => query.bind(f),
            Err(_) => query.bind(v.clone()),
        },
        Value::Text(v) => query.bind(v.clone()),
        Value::Bytes(v) => query.bind(v.clone()),
        Value::Timestamp(v) => query.bind(*v),
        Value::Date(v) => query.bind(*v),
        Value::Time(v) => query.bind(*v),
        Value::Json(v) => query.bind(sqlx::types::Json(v.clone())),
        Value::List(_) => query.bind(value.render()),
    }
}

pub(crate) fn bind_sqlite<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    value: &Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Decimal(v) => match v.parse::<f64>() {
            Ok(f) => query.bind(f),
            Err(_) => query.bind(v.clone()),
        },
        Value::Text(v) => query.bind(v.clone()),
        Value::Bytes(v) => query.bind(v.clone()),
        // SQLite stores temporal values as ISO-8601 text.
        Value::Timestamp(v) => query.bind(*v),
        Value::Date(v) => query.bind(*v),
        Value::Time(v) => query.bind(*v),
        Value::Json(v) => query.bind(sqlx::types::Json(v.clone())),
        Value::List(_) => query.bind(value.render()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_args_pass_through() {
        let (sql, params) = expand_placeholders(
            "SELECT * FROM t WHERE a = ? AND b = ?",
            vec![Value::Int(1), Value::Text("x".into())],
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(params, vec![Value::Int(1), Value::Text("x".into())]);
    }

    #[test]
    fn test_list_expands_to_group() {
        let (sql, params) = expand_placeholders(
            "SELECT * FROM t WHERE id IN ? AND state = ?",
            vec![
                Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
                Value::Text("open".into()),
            ],
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE id IN (?, ?, ?) AND state = ?");
        assert_eq!(
            params,
            vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3),
                Value::Text("open".into())
            ]
        );
    }

    #[test]
    fn test_empty_list_expands_to_empty_group() {
        let (sql, params) =
            expand_placeholders("SELECT * FROM t WHERE id IN ?", vec![Value::List(vec![])])
                .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE id IN ()");
        assert!(params.is_empty());
    }

    #[test]
    fn test_too_few_parameters() {
        let err = expand_placeholders("SELECT * FROM t WHERE a = ? AND b = ?", vec![Value::Int(1)])
            .expect_err("one parameter short");
        assert!(err.is_config());
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_too_many_parameters() {
        let err = expand_placeholders(
            "SELECT * FROM t WHERE a = ?",
            vec![Value::Int(1), Value::Int(2)],
        )
        .expect_err("one parameter over");
        assert!(err.is_config());
        assert!(err.to_string().contains("less than"));
    }

    #[test]
    fn test_numbered_placeholders() {
        assert_eq!(
            numbered_placeholders("INSERT INTO t (a, b) VALUES (?, ?)"),
            "INSERT INTO t (a, b) VALUES ($1, $2)"
        );
        assert_eq!(numbered_placeholders("SELECT 1"), "SELECT 1");
    }
}
