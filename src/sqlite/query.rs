use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};

use crate::error::DbxError;
use crate::results::{ExecResult, ResultSet};
use crate::types::RowValues;

/// Map a `SQLite` column value back to `RowValues`.
///
/// # Errors
///
/// Returns `DbxError::SqliteError` if the column cannot be read.
pub fn sqlite_extract_value_sync(row: &rusqlite::Row, idx: usize) -> Result<RowValues, DbxError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

/// Prepare `query`, run it with `params` and collect every row.
///
/// # Errors
/// Returns `DbxError::SqliteError` if preparation, execution or decoding fails.
pub fn build_result_set(
    conn: &Connection,
    query: &str,
    params: &[Value],
) -> Result<ResultSet, DbxError> {
    let mut stmt = conn.prepare(query)?;
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(Arc::new(column_names));

    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    while let Some(row) = rows.next()? {
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(sqlite_extract_value_sync(row, i)?);
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}

/// Prepare and execute a statement that returns no rows.
///
/// # Errors
/// Returns `DbxError::SqliteError` if preparation or execution fails.
pub fn execute_statement(
    conn: &Connection,
    query: &str,
    params: &[Value],
) -> Result<ExecResult, DbxError> {
    let mut stmt = conn.prepare(query)?;
    let affected = stmt.execute(params_from_iter(params.iter()))?;
    Ok(ExecResult::new(
        affected as u64,
        Some(conn.last_insert_rowid()),
    ))
}
