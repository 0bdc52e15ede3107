//! Fully materialized query results.

use crate::row::{ColumnInfo, FromRow, Row};
use std::sync::Arc;

/// A column set plus the rows decoded against it.
///
/// `T` defaults to [`Row`]; any [`FromRow`] type can be collected instead.
#[derive(Debug, Clone)]
pub struct Table<T = Row> {
    columns: Arc<ColumnInfo>,
    rows: Vec<T>,
}

impl<T: FromRow> Table<T> {
    pub fn new(columns: Arc<ColumnInfo>, rows: Vec<T>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &ColumnInfo {
        &self.columns
    }

    /// Shared handle to the column set.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    pub fn rows(&self) -> &[T] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&T> {
        self.rows.first()
    }

    pub fn into_rows(self) -> Vec<T> {
        self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.rows.iter()
    }
}

impl<T> IntoIterator for Table<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Table<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
