//! Conversions between rusqlite and core types

use rusqlite::{Connection as RusqliteConnection, ErrorCode, Statement, params_from_iter};
use std::sync::Arc;
use tablecopy_core::{
    BatchResult, ColumnDescriptor, CoreError, QueryResult, Result, Row, StatementResult, Value,
};

/// SQLSTATE class reported for constraint violations
const SQLSTATE_INTEGRITY: &str = "23000";
/// SQLSTATE for everything else the engine reports
const SQLSTATE_GENERAL: &str = "HY000";

/// Map a rusqlite error onto `CoreError::Database`, keeping the extended
/// result code as the vendor code.
pub(crate) fn map_sqlite_error(context: &str, err: rusqlite::Error) -> CoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            let sql_state = if failure.code == ErrorCode::ConstraintViolation {
                SQLSTATE_INTEGRITY
            } else {
                SQLSTATE_GENERAL
            };
            CoreError::Database {
                message: format!("{}: {}", context, err),
                sql_state: Some(sql_state.to_string()),
                vendor_code: Some(failure.extended_code),
            }
        }
        _ => CoreError::Query(format!("{}: {}", context, err)),
    }
}

/// Column descriptors of a prepared statement, from declared types only.
pub(crate) fn statement_columns(stmt: &Statement<'_>) -> Vec<ColumnDescriptor> {
    stmt.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            // sqlite3_column_decltype is empty for expressions
            ColumnDescriptor::new(col.name(), col.decl_type().unwrap_or("")).with_ordinal(idx)
        })
        .collect()
}

pub(crate) fn run_execute(
    conn: &RusqliteConnection,
    sql: &str,
    params: &[Value],
) -> Result<StatementResult> {
    let rusqlite_params = values_to_rusqlite(params);
    let rows_affected = conn
        .execute(sql, params_from_iter(rusqlite_params.iter()))
        .map_err(|e| map_sqlite_error("Failed to execute statement", e))?;
    tracing::debug!(affected_rows = rows_affected, "statement executed");
    Ok(StatementResult {
        affected_rows: rows_affected as u64,
    })
}

pub(crate) fn run_query(
    conn: &RusqliteConnection,
    sql: &str,
    params: &[Value],
) -> Result<QueryResult> {
    let start_time = std::time::Instant::now();
    let rusqlite_params = values_to_rusqlite(params);

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| map_sqlite_error("Failed to prepare query", e))?;
    let columns = statement_columns(&stmt);
    let names: Arc<[String]> = columns.iter().map(|c| c.name.clone()).collect();

    let mut rows = Vec::new();
    let mut query_rows = stmt
        .query(params_from_iter(rusqlite_params.iter()))
        .map_err(|e| map_sqlite_error("Failed to execute query", e))?;

    while let Some(row) = query_rows
        .next()
        .map_err(|e| map_sqlite_error("Failed to fetch row", e))?
    {
        rows.push(Row::new(names.clone(), row_values(row, names.len())?));
    }

    let execution_time_ms = start_time.elapsed().as_millis() as u64;
    tracing::debug!(
        row_count = rows.len(),
        execution_time_ms = execution_time_ms,
        "query executed successfully"
    );
    Ok(QueryResult {
        id: uuid::Uuid::new_v4(),
        columns,
        rows,
        execution_time_ms,
    })
}

/// Run `sql` once per parameter set through the statement cache, recording
/// each outcome. A failing set does not stop the remaining ones.
pub(crate) fn run_batch(
    conn: &RusqliteConnection,
    sql: &str,
    rows: &[Vec<Value>],
) -> Result<BatchResult> {
    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(|e| map_sqlite_error("Failed to prepare batch statement", e))?;

    let mut affected_rows = 0;
    let mut row_results = Vec::with_capacity(rows.len());
    for params in rows {
        let rusqlite_params = values_to_rusqlite(params);
        let outcome = stmt
            .execute(params_from_iter(rusqlite_params.iter()))
            .map(|n| n as u64)
            .map_err(|e| map_sqlite_error("Failed to execute batch row", e));
        if let Ok(n) = outcome {
            affected_rows += n;
        }
        row_results.push(outcome);
    }

    tracing::debug!(
        rows = rows.len(),
        affected_rows = affected_rows,
        "batch executed"
    );
    Ok(BatchResult {
        affected_rows,
        row_results: Some(row_results),
    })
}

pub(crate) fn row_values(row: &rusqlite::Row<'_>, width: usize) -> Result<Vec<Value>> {
    (0..width).map(|i| rusqlite_to_value(row, i)).collect()
}

/// Convert our Value types to rusqlite-compatible types
pub(crate) fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(if *b { 1 } else { 0 }),
        Value::Int64(i) => rusqlite::types::Value::Integer(*i),
        Value::Float64(f) => rusqlite::types::Value::Real(*f),
        Value::Decimal(d) => rusqlite::types::Value::Text(d.clone()),
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Bytes(b) => rusqlite::types::Value::Blob(b.clone()),
        Value::Date(d) => rusqlite::types::Value::Text(d.to_string()),
        Value::Time(t) => rusqlite::types::Value::Text(t.to_string()),
        Value::DateTime(dt) => rusqlite::types::Value::Text(dt.to_string()),
        Value::DateTimeUtc(dt) => rusqlite::types::Value::Text(dt.to_rfc3339()),
        Value::Json(j) => rusqlite::types::Value::Text(j.to_string()),
        Value::Uuid(u) => rusqlite::types::Value::Text(u.to_string()),
    }
}

/// Convert rusqlite row value to our Value type
fn rusqlite_to_value(row: &rusqlite::Row<'_>, idx: usize) -> Result<Value> {
    use rusqlite::types::ValueRef;

    let value_ref = row
        .get_ref(idx)
        .map_err(|e| map_sqlite_error("Failed to read column", e))?;

    let value = match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_failures_map_to_integrity_state() {
        let conn = RusqliteConnection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);")
            .unwrap();
        let err = run_execute(&conn, "INSERT INTO t VALUES (?)", &[Value::Int64(1)]).unwrap_err();
        assert_eq!(err.sql_state(), Some("23000"));
        // SQLITE_CONSTRAINT_PRIMARYKEY
        assert_eq!(err.vendor_code(), Some(1555));
    }

    #[test]
    fn test_other_failures_map_to_general_state() {
        let conn = RusqliteConnection::open_in_memory().unwrap();
        let err = run_execute(&conn, "INSERT INTO missing VALUES (1)", &[]).unwrap_err();
        assert_eq!(err.sql_state(), Some("HY000"));
    }

    #[test]
    fn test_batch_attributes_each_row() {
        let conn = RusqliteConnection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
        let rows = vec![
            vec![Value::Int64(1)],
            vec![Value::Int64(1)],
            vec![Value::Int64(2)],
        ];
        let result = run_batch(&conn, "INSERT INTO t VALUES (?)", &rows).unwrap();
        assert_eq!(result.affected_rows, 2);
        assert_eq!(result.failed_count(), Some(1));
        let results = result.row_results.unwrap();
        assert!(results[1].is_err());
    }

    #[test]
    fn test_statement_columns_use_declared_types() {
        let conn = RusqliteConnection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER, name VARCHAR(20))").unwrap();
        let stmt = conn.prepare("SELECT id, name, 1 + 1 AS two FROM t").unwrap();
        let columns = statement_columns(&stmt);
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[1].type_name, "VARCHAR(20)");
        assert_eq!(columns[1].size, Some(20));
        assert_eq!(columns[2].name, "two");
        assert_eq!(columns[2].ordinal, 2);
    }
}
