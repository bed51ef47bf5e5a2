mod result_set;
mod row;

pub use result_set::ResultSet;
pub use row::CustomDbRow;

use crate::error::DbxError;

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Rows inserted, updated or deleted by the statement.
    pub rows_affected: u64,
    /// Row id generated by the statement, when the backend reports one.
    pub last_insert_id: Option<i64>,
}

impl ExecResult {
    #[must_use]
    pub fn new(rows_affected: u64, last_insert_id: Option<i64>) -> Self {
        Self {
            rows_affected,
            last_insert_id,
        }
    }
}

/// Handle returned by single-row queries.
///
/// Building one never fails: any error from running the statement is kept
/// inside and only surfaces when the row is read, so call sites can chain
/// `query_row(...).await.into_row()?`.
#[derive(Debug)]
pub struct SingleRow {
    inner: Result<Option<CustomDbRow>, DbxError>,
}

impl SingleRow {
    #[must_use]
    pub fn from_result(inner: Result<Option<CustomDbRow>, DbxError>) -> Self {
        Self { inner }
    }

    /// First row of a result set, or an empty handle when there is none.
    #[must_use]
    pub fn from_result_set(result: Result<ResultSet, DbxError>) -> Self {
        Self {
            inner: result.map(|rs| rs.results.into_iter().next()),
        }
    }

    /// The deferred error, if running the statement failed.
    #[must_use]
    pub fn err(&self) -> Option<&DbxError> {
        self.inner.as_ref().err()
    }

    /// Take the row.
    ///
    /// # Errors
    /// Returns the deferred execution error, or [`DbxError::NoRows`] when the
    /// statement produced no row.
    pub fn into_row(self) -> Result<CustomDbRow, DbxError> {
        self.inner?.ok_or(DbxError::NoRows)
    }

    /// Take the row if there is one.
    ///
    /// # Errors
    /// Returns the deferred execution error.
    pub fn into_optional(self) -> Result<Option<CustomDbRow>, DbxError> {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::types::RowValues;

    #[test]
    fn single_row_defers_errors_until_read() {
        let row = SingleRow::from_result(Err(DbxError::ExecutionError("boom".into())));
        assert!(row.err().is_some());
        assert!(matches!(row.into_row(), Err(DbxError::ExecutionError(_))));
    }

    #[test]
    fn empty_result_set_reads_as_no_rows() {
        let row = SingleRow::from_result_set(Ok(ResultSet::default()));
        assert!(row.err().is_none());
        assert!(matches!(row.into_row(), Err(DbxError::NoRows)));
    }

    #[test]
    fn first_row_is_kept() {
        let mut rs = ResultSet::with_capacity(2);
        rs.set_column_names(Arc::new(vec!["id".to_string()]));
        rs.add_row_values(vec![RowValues::Int(1)]);
        rs.add_row_values(vec![RowValues::Int(2)]);

        let row = SingleRow::from_result_set(Ok(rs)).into_row().expect("row");
        assert_eq!(row.get("id"), Some(&RowValues::Int(1)));
    }
}
