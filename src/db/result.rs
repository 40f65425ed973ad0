//! Query result set returned by the execution boundary

use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One cell of a result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    /// Type a textual database value: integer, then float, then boolean
    /// (`t`/`f` as Postgres prints them), otherwise text.
    pub fn from_text(raw: Option<String>) -> Self {
        let Some(text) = raw else {
            return CellValue::Null;
        };
        if let Ok(i) = text.parse::<i64>() {
            return CellValue::Int(i);
        }
        if let Ok(f) = text.parse::<f64>() {
            if f.is_finite() {
                return CellValue::Float(f);
            }
        }
        match text.as_str() {
            "t" | "true" => CellValue::Bool(true),
            "f" | "false" => CellValue::Bool(false),
            _ => CellValue::Text(text),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Null, blank text, or a zero in any representation.
    pub fn is_empty_sentinel(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Bool(_) => false,
            CellValue::Int(i) => *i == 0,
            CellValue::Float(f) => *f == 0.0,
            CellValue::Text(s) => {
                let s = s.trim();
                s.is_empty() || s.parse::<f64>().map(|f| f == 0.0).unwrap_or(false)
            }
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(x) => write!(f, "{}", x),
            CellValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Columns plus rows; every row is exactly as wide as the column list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Result<Self> {
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(AssistantError::Execution(format!(
                "Column count {} does not match row {} width {}",
                columns.len(),
                idx,
                row.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, top to bottom.
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &CellValue> {
        self.rows.iter().filter_map(move |row| row.get(idx))
    }

    /// No rows, or a single column holding nothing but empty/zero values.
    /// This is a proxy for "uninformative", typical of an aggregate over a
    /// filter that matched nothing.
    pub fn is_degenerate(&self) -> bool {
        if self.rows.is_empty() {
            return true;
        }
        self.columns.len() == 1 && self.column_values(0).all(CellValue::is_empty_sentinel)
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let record: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .zip(row.iter())
                    .map(|(col, value)| {
                        (col.clone(), serde_json::to_value(value).unwrap_or(serde_json::Value::Null))
                    })
                    .collect();
                serde_json::Value::Object(record)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_is_error() {
        let err = ResultSet::new(
            vec!["a".into(), "b".into()],
            vec![vec![CellValue::Int(1), CellValue::Int(2)], vec![CellValue::Int(3)]],
        )
        .unwrap_err();
        assert!(matches!(err, AssistantError::Execution(_)));
    }

    #[test]
    fn test_from_text_typing() {
        assert_eq!(CellValue::from_text(None), CellValue::Null);
        assert_eq!(CellValue::from_text(Some("42".into())), CellValue::Int(42));
        assert_eq!(CellValue::from_text(Some("1250.50".into())), CellValue::Float(1250.5));
        assert_eq!(CellValue::from_text(Some("t".into())), CellValue::Bool(true));
        assert_eq!(CellValue::from_text(Some("Acme".into())), CellValue::Text("Acme".into()));
        assert_eq!(CellValue::from_text(Some("NaN".into())), CellValue::Text("NaN".into()));
    }

    #[test]
    fn test_degenerate_detection() {
        assert!(ResultSet::empty().is_degenerate());

        let zeros = ResultSet::new(
            vec!["Revenue".into()],
            vec![vec![CellValue::Int(0)], vec![CellValue::Float(0.0)], vec![CellValue::Null]],
        )
        .unwrap();
        assert!(zeros.is_degenerate());

        let informative = ResultSet::new(vec!["Revenue".into()], vec![vec![CellValue::Int(10)]]).unwrap();
        assert!(!informative.is_degenerate());

        let two_columns = ResultSet::new(
            vec!["Name".into(), "Total".into()],
            vec![vec![CellValue::Text("".into()), CellValue::Int(0)]],
        )
        .unwrap();
        assert!(!two_columns.is_degenerate());
    }

    #[test]
    fn test_to_records() {
        let rs = ResultSet::new(
            vec!["Name".into(), "Orders".into()],
            vec![vec![CellValue::Text("Acme".into()), CellValue::Int(3)]],
        )
        .unwrap();
        let records = rs.to_records();
        assert_eq!(records[0]["Name"], "Acme");
        assert_eq!(records[0]["Orders"], 3);
    }
}
