//! Row-oriented tabular input for batch constructors

use crate::error::{PlanError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Ordered field mapping used for argsets and table records
pub type Fields = IndexMap<String, Value>;

/// A table of rows sharing one column set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Create an empty table with the given columns
    #[must_use]
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row
    ///
    /// # Errors
    /// Returns `InvalidInput` if the row width differs from the column count
    /// or the table repeats a column name
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if self.rows.is_empty() {
            self.check_columns()?;
        }
        if row.len() != self.columns.len() {
            return Err(PlanError::InvalidInput(format!(
                "row has {} values, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Builder-style [`Table::push_row`]
    ///
    /// # Errors
    /// Returns `InvalidInput` on width mismatch
    pub fn with_row(mut self, row: Vec<Value>) -> Result<Self> {
        self.push_row(row)?;
        Ok(self)
    }

    /// Build a table from records; columns are the union of keys in first-seen order
    ///
    /// Missing fields become `null`.
    #[must_use]
    pub fn from_records(records: &[Fields]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        let rows = records
            .iter()
            .map(|r| {
                columns
                    .iter()
                    .map(|c| r.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    /// Column names
    #[inline]
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the table has no rows
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as field mappings, in row order
    ///
    /// # Errors
    /// Returns `InvalidInput` if a column name repeats, since one of the
    /// values would be lost
    pub fn records(&self) -> Result<Vec<Fields>> {
        self.check_columns()?;
        Ok(self
            .rows
            .iter()
            .map(|row| self.columns.iter().cloned().zip(row.iter().cloned()).collect())
            .collect())
    }

    fn check_columns(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.columns.len());
        match self.columns.iter().find(|c| !seen.insert(c.as_str())) {
            Some(column) => Err(PlanError::InvalidInput(format!(
                "column '{column}' appears more than once"
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn push_row_checks_width() {
        let mut table = Table::new(["a", "b"]);
        assert!(table.push_row(vec![json!(1), json!(2)]).is_ok());
        assert!(matches!(
            table.push_row(vec![json!(1)]),
            Err(PlanError::InvalidInput(_))
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn records_follow_column_order() {
        let table = Table::new(["x", "y"])
            .with_row(vec![json!(1), json!("a")])
            .unwrap();
        let records = table.records().unwrap();
        assert_eq!(records.len(), 1);
        let keys: Vec<_> = records[0].keys().cloned().collect();
        assert_eq!(keys, vec!["x", "y"]);
        assert_eq!(records[0]["y"], json!("a"));
    }

    #[test]
    fn from_records_fills_missing() {
        let mut r1 = Fields::new();
        r1.insert("a".into(), json!(1));
        let mut r2 = Fields::new();
        r2.insert("b".into(), json!(2));
        let table = Table::from_records(&[r1, r2]);
        assert_eq!(table.columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(table.records().unwrap()[1]["a"], Value::Null);
    }

    #[test]
    fn repeated_columns_rejected() {
        let result = Table::new(["a", "a"]).with_row(vec![json!(1), json!(2)]);
        assert!(matches!(result, Err(PlanError::InvalidInput(ref m)) if m.contains("'a'")));
    }

    #[test]
    fn deserialized_repeated_columns_rejected_on_records() {
        let table: Table =
            serde_json::from_value(json!({"columns": ["a", "b", "a"], "rows": [[1, 2, 3]]})).unwrap();
        assert!(matches!(table.records(), Err(PlanError::InvalidInput(_))));
    }
}
