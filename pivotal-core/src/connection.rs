//! The driver seam: a small object-safe connection trait and its sqlx backends.

use async_trait::async_trait;

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::value::{Id, Row, Value};

/// A single database connection the engine can run statements on.
///
/// Statements carry dialect placeholders and a positional parameter list.
/// Implementations decode result rows into [`Row`]s of [`Value`]s.
#[async_trait]
pub trait Connection: Send {
    fn dialect(&self) -> Dialect;

    /// Runs a statement and returns the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> std::result::Result<u64, sqlx::Error>;

    async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> std::result::Result<Vec<Row>, sqlx::Error>;

    /// Runs an insert and returns the generated id, if one was produced.
    async fn insert(&mut self, sql: &str, params: &[Value]) -> std::result::Result<Option<Id>, sqlx::Error>;

    /// Runs a parameterless statement outside the prepared-statement path.
    async fn batch(&mut self, sql: &str) -> std::result::Result<(), sqlx::Error>;

    async fn begin(&mut self) -> std::result::Result<(), sqlx::Error> {
        self.batch("BEGIN").await
    }

    async fn commit(&mut self) -> std::result::Result<(), sqlx::Error> {
        self.batch("COMMIT").await
    }

    async fn rollback(&mut self) -> std::result::Result<(), sqlx::Error> {
        self.batch("ROLLBACK").await
    }
}

/// Opens one connection, choosing the backend by URL scheme.
///
/// SQLite files are created when missing.
pub async fn connect(url: &str) -> Result<Box<dyn Connection>> {
    let scheme = url.split(':').next().unwrap_or_default();
    tracing::debug!(scheme = %scheme, "opening pivotal connection");
    match scheme {
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            use sqlx::ConnectOptions;
            use std::str::FromStr;

            let options = sqlx::sqlite::SqliteConnectOptions::from_str(url)
                .map_err(|e| Error::Config(e.to_string()))?
                .create_if_missing(true)
                .busy_timeout(std::time::Duration::from_secs(5));
            let conn = options
                .connect()
                .await
                .map_err(|e| Error::data_access("opening sqlite connection", e))?;
            Ok(Box::new(conn))
        }
        #[cfg(feature = "postgres")]
        "postgres" | "postgresql" => {
            let conn = <sqlx::PgConnection as sqlx::Connection>::connect(url)
                .await
                .map_err(|e| Error::data_access("opening postgres connection", e))?;
            Ok(Box::new(conn))
        }
        #[cfg(feature = "mysql")]
        "mysql" | "mariadb" => {
            let conn = <sqlx::MySqlConnection as sqlx::Connection>::connect(url)
                .await
                .map_err(|e| Error::data_access("opening mysql connection", e))?;
            Ok(Box::new(conn))
        }
        other => Err(Error::Config(format!(
            "unsupported database url scheme '{}' (enabled backends: {})",
            other,
            enabled_backends()
        ))),
    }
}

fn enabled_backends() -> String {
    let mut names: Vec<&str> = Vec::new();
    if cfg!(feature = "sqlite") {
        names.push("sqlite");
    }
    if cfg!(feature = "postgres") {
        names.push("postgres");
    }
    if cfg!(feature = "mysql") {
        names.push("mysql");
    }
    if names.is_empty() {
        "none".to_owned()
    } else {
        names.join(", ")
    }
}

fn json_text(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnection, SqliteRow};
    use sqlx::{Column as _, Row as _, TypeInfo as _, ValueRef as _};

    type Query<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

    fn bind<'q>(query: Query<'q>, value: &Value) -> Query<'q> {
        match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
            Value::Array(_) => query.bind(json_text(value)),
        }
    }

    fn prepare<'q>(sql: &'q str, params: &[Value]) -> Query<'q> {
        params.iter().fold(sqlx::query(sql), bind)
    }

    fn decode(row: &SqliteRow) -> std::result::Result<Row, sqlx::Error> {
        let mut columns = Vec::with_capacity(row.columns().len());
        let mut values = Vec::with_capacity(row.columns().len());
        for (i, column) in row.columns().iter().enumerate() {
            columns.push(column.name().to_owned());
            let declared = column.type_info().name().to_ascii_uppercase();
            let raw = row.try_get_raw(i)?;
            if raw.is_null() {
                values.push(Value::Null);
                continue;
            }
            let storage = raw.type_info().name().to_owned();
            let value = match storage.as_str() {
                "INTEGER" if declared.contains("BOOL") => {
                    Value::Bool(row.try_get_unchecked::<i64, _>(i)? != 0)
                }
                "INTEGER" => Value::Int(row.try_get_unchecked::<i64, _>(i)?),
                "REAL" => Value::Float(row.try_get_unchecked::<f64, _>(i)?),
                "BLOB" => Value::Text(
                    String::from_utf8_lossy(&row.try_get_unchecked::<Vec<u8>, _>(i)?).into_owned(),
                ),
                _ => Value::Text(row.try_get_unchecked::<String, _>(i)?),
            };
            values.push(value);
        }
        Ok(Row::new(columns, values))
    }

    #[async_trait]
    impl Connection for SqliteConnection {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }

        async fn execute(&mut self, sql: &str, params: &[Value]) -> std::result::Result<u64, sqlx::Error> {
            let done = prepare(sql, params).execute(&mut *self).await?;
            Ok(done.rows_affected())
        }

        async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> std::result::Result<Vec<Row>, sqlx::Error> {
            let rows = prepare(sql, params).fetch_all(&mut *self).await?;
            rows.iter().map(decode).collect()
        }

        async fn insert(&mut self, sql: &str, params: &[Value]) -> std::result::Result<Option<Id>, sqlx::Error> {
            let done = prepare(sql, params).execute(&mut *self).await?;
            Ok((done.rows_affected() > 0).then_some(done.last_insert_rowid()))
        }

        async fn batch(&mut self, sql: &str) -> std::result::Result<(), sqlx::Error> {
            let conn: &mut SqliteConnection = self;
            sqlx::Executor::execute(conn, sql).await?;
            Ok(())
        }
    }
}

#[cfg(feature = "postgres")]
mod postgres {
    use super::*;
    use sqlx::postgres::{PgArguments, PgConnection, PgRow, Postgres};
    use sqlx::{Column as _, Row as _, TypeInfo as _, ValueRef as _};

    type Query<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

    fn bind<'q>(query: Query<'q>, value: &Value) -> Query<'q> {
        match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
            Value::Array(items) => bind_array(query, items),
        }
    }

    fn bind_array<'q>(query: Query<'q>, items: &[Value]) -> Query<'q> {
        if let Some(ints) = items.iter().map(|v| match v {
            Value::Int(i) => Some(*i),
            _ => None,
        }).collect::<Option<Vec<i64>>>() {
            return query.bind(ints);
        }
        if let Some(texts) = items.iter().map(|v| v.as_str().map(str::to_owned)).collect::<Option<Vec<String>>>() {
            return query.bind(texts);
        }
        if let Some(bools) = items.iter().map(|v| match v {
            Value::Bool(b) => Some(*b),
            _ => None,
        }).collect::<Option<Vec<bool>>>() {
            return query.bind(bools);
        }
        if let Some(floats) = items.iter().map(|v| match v {
            Value::Float(f) => Some(*f),
            _ => None,
        }).collect::<Option<Vec<f64>>>() {
            return query.bind(floats);
        }
        query.bind(Value::array_literal(items))
    }

    fn prepare<'q>(sql: &'q str, params: &[Value]) -> Query<'q> {
        params.iter().fold(sqlx::query(sql), bind)
    }

    fn decode(row: &PgRow) -> std::result::Result<Row, sqlx::Error> {
        let mut columns = Vec::with_capacity(row.columns().len());
        let mut values = Vec::with_capacity(row.columns().len());
        for (i, column) in row.columns().iter().enumerate() {
            columns.push(column.name().to_owned());
            if row.try_get_raw(i)?.is_null() {
                values.push(Value::Null);
                continue;
            }
            let value = match column.type_info().name() {
                "INT2" => Value::Int(i64::from(row.try_get::<i16, _>(i)?)),
                "INT4" => Value::Int(i64::from(row.try_get::<i32, _>(i)?)),
                "INT8" => Value::Int(row.try_get::<i64, _>(i)?),
                "FLOAT4" => Value::Float(f64::from(row.try_get::<f32, _>(i)?)),
                "FLOAT8" => Value::Float(row.try_get::<f64, _>(i)?),
                "BOOL" => Value::Bool(row.try_get::<bool, _>(i)?),
                "INT4[]" => Value::from(
                    row.try_get::<Vec<i32>, _>(i)?.into_iter().map(i64::from).collect::<Vec<_>>(),
                ),
                "INT8[]" => Value::from(row.try_get::<Vec<i64>, _>(i)?),
                "FLOAT8[]" => Value::from(row.try_get::<Vec<f64>, _>(i)?),
                "BOOL[]" => Value::from(row.try_get::<Vec<bool>, _>(i)?),
                "TEXT[]" | "VARCHAR[]" => Value::from(row.try_get::<Vec<String>, _>(i)?),
                _ => Value::Text(row.try_get_unchecked::<String, _>(i)?),
            };
            values.push(value);
        }
        Ok(Row::new(columns, values))
    }

    #[async_trait]
    impl Connection for PgConnection {
        fn dialect(&self) -> Dialect {
            Dialect::Postgres
        }

        async fn execute(&mut self, sql: &str, params: &[Value]) -> std::result::Result<u64, sqlx::Error> {
            let done = prepare(sql, params).execute(&mut *self).await?;
            Ok(done.rows_affected())
        }

        async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> std::result::Result<Vec<Row>, sqlx::Error> {
            let rows = prepare(sql, params).fetch_all(&mut *self).await?;
            rows.iter().map(decode).collect()
        }

        async fn insert(&mut self, sql: &str, params: &[Value]) -> std::result::Result<Option<Id>, sqlx::Error> {
            let returning = self.dialect().returning(sql, "id");
            let rows = prepare(&returning, params).fetch_all(&mut *self).await?;
            let Some(row) = rows.first() else {
                return Ok(None);
            };
            Ok(decode(row)?.id("id"))
        }

        async fn batch(&mut self, sql: &str) -> std::result::Result<(), sqlx::Error> {
            let conn: &mut PgConnection = self;
            sqlx::Executor::execute(conn, sql).await?;
            Ok(())
        }
    }
}

#[cfg(feature = "mysql")]
mod mysql {
    use super::*;
    use sqlx::mysql::{MySql, MySqlArguments, MySqlConnection, MySqlRow};
    use sqlx::{Column as _, Row as _, TypeInfo as _, ValueRef as _};

    type Query<'q> = sqlx::query::Query<'q, MySql, MySqlArguments>;

    fn bind<'q>(query: Query<'q>, value: &Value) -> Query<'q> {
        match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
            Value::Array(_) => query.bind(json_text(value)),
        }
    }

    fn prepare<'q>(sql: &'q str, params: &[Value]) -> Query<'q> {
        params.iter().fold(sqlx::query(sql), bind)
    }

    fn decode(row: &MySqlRow) -> std::result::Result<Row, sqlx::Error> {
        let mut columns = Vec::with_capacity(row.columns().len());
        let mut values = Vec::with_capacity(row.columns().len());
        for (i, column) in row.columns().iter().enumerate() {
            columns.push(column.name().to_owned());
            if row.try_get_raw(i)?.is_null() {
                values.push(Value::Null);
                continue;
            }
            let ty = column.type_info().name();
            let value = if ty == "BOOLEAN" {
                Value::Bool(row.try_get_unchecked::<bool, _>(i)?)
            } else if ty.ends_with("UNSIGNED") {
                let raw = row.try_get_unchecked::<u64, _>(i)?;
                i64::try_from(raw).map_or_else(
                    |_| Value::Text(raw.to_string()),
                    Value::Int,
                )
            } else if ty.ends_with("INT") {
                Value::Int(row.try_get_unchecked::<i64, _>(i)?)
            } else if ty == "FLOAT" {
                Value::Float(f64::from(row.try_get_unchecked::<f32, _>(i)?))
            } else if ty == "DOUBLE" {
                Value::Float(row.try_get_unchecked::<f64, _>(i)?)
            } else {
                Value::Text(row.try_get_unchecked::<String, _>(i)?)
            };
            values.push(value);
        }
        Ok(Row::new(columns, values))
    }

    #[async_trait]
    impl Connection for MySqlConnection {
        fn dialect(&self) -> Dialect {
            Dialect::MySql
        }

        async fn execute(&mut self, sql: &str, params: &[Value]) -> std::result::Result<u64, sqlx::Error> {
            let done = prepare(sql, params).execute(&mut *self).await?;
            Ok(done.rows_affected())
        }

        async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> std::result::Result<Vec<Row>, sqlx::Error> {
            let rows = prepare(sql, params).fetch_all(&mut *self).await?;
            rows.iter().map(decode).collect()
        }

        async fn insert(&mut self, sql: &str, params: &[Value]) -> std::result::Result<Option<Id>, sqlx::Error> {
            let done = prepare(sql, params).execute(&mut *self).await?;
            if done.rows_affected() == 0 {
                return Ok(None);
            }
            Ok(i64::try_from(done.last_insert_id()).ok())
        }

        async fn batch(&mut self, sql: &str) -> std::result::Result<(), sqlx::Error> {
            let conn: &mut MySqlConnection = self;
            sqlx::Executor::execute(conn, sql).await?;
            Ok(())
        }
    }
}
