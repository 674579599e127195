//! Execution request/result data models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A caller-supplied date window for template expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Both bounds formatted as `YYYYMMDD` literals.
    pub fn as_compact(&self) -> (String, String) {
        (
            self.start.format("%Y%m%d").to_string(),
            self.end.format("%Y%m%d").to_string(),
        )
    }
}

/// Result of one query execution. Ephemeral, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    pub row_count: usize,
    pub rows_affected: u64,
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    /// Build a result with explicit column order (as reported by the
    /// driver; JSON maps alone do not preserve it).
    pub fn new(
        columns: Vec<String>,
        rows: Vec<serde_json::Map<String, JsonValue>>,
        rows_affected: u64,
        elapsed_ms: u64,
    ) -> Self {
        let columns = if columns.is_empty() {
            rows.first()
                .map(|row| row.keys().cloned().collect())
                .unwrap_or_default()
        } else {
            columns
        };
        Self {
            row_count: rows.len(),
            columns,
            rows,
            rows_affected,
            elapsed_ms,
        }
    }

    /// Build a result deriving column names from the first row.
    pub fn from_rows(
        rows: Vec<serde_json::Map<String, JsonValue>>,
        rows_affected: u64,
        elapsed_ms: u64,
    ) -> Self {
        Self::new(Vec::new(), rows, rows_affected, elapsed_ms)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One chunk of a streamed result set.
///
/// Streams deliver the same normalized rows as [`ExecutionResult`], split
/// into fixed-size batches, each carrying the running total and whether it
/// is the final batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowBatch {
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    pub total: usize,
    pub is_complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param_types() {
        assert!(QueryParam::Null.is_null());
        assert!(!QueryParam::Bool(true).is_null());
        assert_eq!(QueryParam::Int(42).type_name(), "int");
        assert_eq!(
            QueryParam::String("hello".to_string()).type_name(),
            "string"
        );
    }

    #[test]
    fn test_bytes_param_roundtrips_as_base64() {
        let param = QueryParam::Bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        let json = serde_json::to_string(&param).unwrap();
        assert!(json.contains("3q2+7w=="));
        let back: QueryParam = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, QueryParam::Bytes(b) if b == vec![0xde, 0xad, 0xbe, 0xef]));
    }

    #[test]
    fn test_date_range_compact_format() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 3, 7).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        );
        assert_eq!(
            range.as_compact(),
            ("20240307".to_string(), "20241231".to_string())
        );
    }

    #[test]
    fn test_result_from_rows() {
        let mut row = serde_json::Map::new();
        row.insert("city".to_string(), JsonValue::String("Hanoi".to_string()));
        let result = ExecutionResult::from_rows(vec![row], 0, 12);
        assert_eq!(result.row_count, 1);
        assert_eq!(result.columns, vec!["city".to_string()]);
        assert!(!result.is_empty());
    }

    #[test]
    fn test_empty_result_has_no_columns() {
        let result = ExecutionResult::from_rows(Vec::new(), 3, 5);
        assert!(result.is_empty());
        assert!(result.columns.is_empty());
        assert_eq!(result.rows_affected, 3);
    }
}
