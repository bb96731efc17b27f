//! Statement execution over a rusqlite connection.

use super::bindings::QueryParameterBindings;
use crate::error::Error;
use crate::metamodel::BasicType;
use crate::sql::JdbcOperation;
use crate::value::Value;
use rusqlite::types::{ToSql, ToSqlOutput, Type, Value as SqliteValue, ValueRef};
use rusqlite::{Connection, Row};
use tracing::debug;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqliteValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqliteValue::Integer(i64::from(*b))),
            Value::Int32(i) => ToSqlOutput::Owned(SqliteValue::Integer(i64::from(*i))),
            Value::Int64(i) | Value::Timestamp(i) => ToSqlOutput::Owned(SqliteValue::Integer(*i)),
            Value::Float64(f) => ToSqlOutput::Owned(SqliteValue::Real(*f)),
            Value::Char(c) => ToSqlOutput::Owned(SqliteValue::Text(c.to_string())),
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Uuid(u) => ToSqlOutput::Borrowed(ValueRef::Blob(u)),
        })
    }
}

/// Read column `index` as `ty`, or with its storage type when `ty` is `None`.
pub fn read_value(row: &Row<'_>, index: usize, ty: Option<BasicType>) -> rusqlite::Result<Value> {
    let raw = row.get_ref(index)?;
    let text = |bytes: &[u8]| {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
    };
    Ok(match (raw, ty) {
        (ValueRef::Null, _) => Value::Null,
        (ValueRef::Integer(i), Some(BasicType::Boolean)) => Value::Bool(i != 0),
        (ValueRef::Integer(i), Some(BasicType::Integer)) => Value::Int32(
            i32::try_from(i).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(index, i))?,
        ),
        (ValueRef::Integer(i), Some(BasicType::Double)) => Value::Float64(i as f64),
        (ValueRef::Integer(i), Some(BasicType::Timestamp)) => Value::Timestamp(i),
        (ValueRef::Integer(i), _) => Value::Int64(i),
        (ValueRef::Real(f), Some(BasicType::Integer)) => Value::Int32(f as i32),
        (ValueRef::Real(f), Some(BasicType::Long)) => Value::Int64(f as i64),
        (ValueRef::Real(f), _) => Value::Float64(f),
        (ValueRef::Text(t), Some(BasicType::Character)) => {
            let s = text(t)?;
            match s.chars().next() {
                Some(c) if s.chars().count() == 1 => Value::Char(c),
                _ => Value::String(s),
            }
        }
        (ValueRef::Text(t), _) => Value::String(text(t)?),
        (ValueRef::Blob(b), Some(BasicType::Uuid)) => match <[u8; 16]>::try_from(b) {
            Ok(u) => Value::Uuid(u),
            Err(_) => Value::Bytes(b.to_vec()),
        },
        (ValueRef::Blob(b), _) => Value::Bytes(b.to_vec()),
    })
}

/// Executes rendered operations against one connection.
pub struct StatementExecutor<'c> {
    connection: &'c Connection,
}

impl<'c> StatementExecutor<'c> {
    pub fn new(connection: &'c Connection) -> Self {
        Self { connection }
    }

    /// Run a query, handing each row to `consume` as it is read. Column `i` is
    /// read as `column_types[i]` (natural type past the end). Returns the
    /// number of rows read.
    pub fn execute_query<F>(
        &self,
        operation: &JdbcOperation,
        bindings: &QueryParameterBindings,
        column_types: &[Option<BasicType>],
        mut consume: F,
    ) -> Result<usize, Error>
    where
        F: FnMut(&[Value]) -> Result<(), Error>,
    {
        let values = bindings.resolve(&operation.parameter_binders)?;
        debug!(sql = %operation.sql, parameters = values.len(), "executing query");
        let database = |source| Error::Database {
            sql: operation.sql.clone(),
            source,
        };

        let mut statement = self.connection.prepare_cached(&operation.sql).map_err(database)?;
        let column_count = statement.column_count();
        let mut rows = statement
            .query(rusqlite::params_from_iter(values.iter()))
            .map_err(database)?;

        let mut buffer = Vec::with_capacity(column_count);
        let mut count = 0;
        while let Some(row) = rows.next().map_err(database)? {
            buffer.clear();
            for index in 0..column_count {
                let ty = column_types.get(index).copied().flatten();
                buffer.push(read_value(row, index, ty).map_err(database)?);
            }
            consume(&buffer)?;
            count += 1;
        }
        Ok(count)
    }

    /// Collect every row of a query.
    pub fn list(
        &self,
        operation: &JdbcOperation,
        bindings: &QueryParameterBindings,
        column_types: &[Option<BasicType>],
    ) -> Result<Vec<Vec<Value>>, Error> {
        let mut rows = Vec::new();
        self.execute_query(operation, bindings, column_types, |row| {
            rows.push(row.to_vec());
            Ok(())
        })?;
        Ok(rows)
    }

    /// Run an insert, update or delete and return the affected row count.
    pub fn execute_update(
        &self,
        operation: &JdbcOperation,
        bindings: &QueryParameterBindings,
    ) -> Result<usize, Error> {
        let values = bindings.resolve(&operation.parameter_binders)?;
        debug!(sql = %operation.sql, parameters = values.len(), "executing update");
        let mut statement = self
            .connection
            .prepare_cached(&operation.sql)
            .map_err(|source| Error::Database {
                sql: operation.sql.clone(),
                source,
            })?;
        statement
            .execute(rusqlite::params_from_iter(values.iter()))
            .map_err(|source| Error::Database {
                sql: operation.sql.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::ParameterBinder;
    use quarry_lang::Parameter;
    use std::collections::BTreeSet;

    fn operation(sql: &str, binders: Vec<ParameterBinder>) -> JdbcOperation {
        JdbcOperation {
            sql: sql.to_string(),
            parameter_binders: binders,
            affected_tables: BTreeSet::new(),
        }
    }

    fn connection() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        connection
            .execute_batch(
                "create table t (id integer primary key, flag integer, name text, code text, data blob);
                 insert into t values (1, 1, 'alpha', 'A', x'00010203040506070809000102030405');
                 insert into t values (2, 0, null, 'B', null);",
            )
            .unwrap();
        connection
    }

    #[test]
    fn reads_typed_columns() {
        let connection = connection();
        let executor = StatementExecutor::new(&connection);
        let rows = executor
            .list(
                &operation("select id, flag, name, code, data from t order by id", vec![]),
                &QueryParameterBindings::new(),
                &[
                    Some(BasicType::Long),
                    Some(BasicType::Boolean),
                    Some(BasicType::String),
                    Some(BasicType::Character),
                    Some(BasicType::Uuid),
                ],
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Value::Int64(1));
        assert_eq!(rows[0][1], Value::Bool(true));
        assert_eq!(rows[0][2], Value::String("alpha".into()));
        assert_eq!(rows[0][3], Value::Char('A'));
        assert!(matches!(rows[0][4], Value::Uuid(_)));
        assert_eq!(rows[1][2], Value::Null);
    }

    #[test]
    fn binds_parameters_and_counts_updates() {
        let connection = connection();
        let executor = StatementExecutor::new(&connection);
        let mut bindings = QueryParameterBindings::new();
        bindings.set_named("id", 2i64);
        let updated = executor
            .execute_update(
                &operation(
                    "update t set name=? where id=?",
                    vec![
                        ParameterBinder::Literal(Value::String("beta".into())),
                        ParameterBinder::Query {
                            parameter: Parameter::Named("id".into()),
                            ty: Some(BasicType::Long),
                        },
                    ],
                ),
                &bindings,
            )
            .unwrap();
        assert_eq!(updated, 1);

        let mut names = Vec::new();
        executor
            .execute_query(
                &operation("select name from t where id=2", vec![]),
                &QueryParameterBindings::new(),
                &[],
                |row| {
                    names.push(row[0].clone());
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(names, vec![Value::String("beta".into())]);
    }

    #[test]
    fn database_errors_carry_sql() {
        let connection = connection();
        let executor = StatementExecutor::new(&connection);
        let err = executor
            .list(
                &operation("select nope from t", vec![]),
                &QueryParameterBindings::new(),
                &[],
            )
            .unwrap_err();
        match err {
            Error::Database { sql, .. } => assert_eq!(sql, "select nope from t"),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
