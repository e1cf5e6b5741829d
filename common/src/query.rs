// Filter algebra evaluated over the canonical JSON form of stored rows
//
// Storage backends materialize each row as a `serde_json::Value` and apply
// the filter, sort and pagination here, so every backend shares one
// query semantic. Field paths are dotted ("header.author").

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    Lt(String, Value),
    Le(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    Contains(String, String),
    // Case-insensitive variants
    IEq(String, String),
    IContains(String, String),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub sort: Vec<Sort>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QueryParams {
    pub fn sorted_by(field: &str) -> Self {
        Self {
            sort: vec![Sort {
                field: field.to_owned(),
                descending: false,
            }],
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// Resolve a dotted field path inside a row
pub fn field<'a>(row: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = row;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

// Total order over scalar JSON values, None when the types don't compare
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
                return Some(a.cmp(&b));
            }
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return Some(a.cmp(&b));
            }
            a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b))
        }
        _ => None,
    }
}

impl Filter {
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(row)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(row)),
            Filter::Not(filter) => !filter.matches(row),
            Filter::Eq(path, expected) => {
                field(row, path).map(|v| v == expected).unwrap_or(false)
            }
            Filter::Ne(path, expected) => {
                field(row, path).map(|v| v != expected).unwrap_or(true)
            }
            Filter::In(path, values) => field(row, path)
                .map(|v| values.iter().any(|e| e == v))
                .unwrap_or(false),
            Filter::Lt(path, bound) => Self::ordered(row, path, bound, Ordering::is_lt),
            Filter::Le(path, bound) => Self::ordered(row, path, bound, Ordering::is_le),
            Filter::Gt(path, bound) => Self::ordered(row, path, bound, Ordering::is_gt),
            Filter::Ge(path, bound) => Self::ordered(row, path, bound, Ordering::is_ge),
            Filter::Contains(path, needle) => field(row, path)
                .and_then(Value::as_str)
                .map(|s| s.contains(needle.as_str()))
                .unwrap_or(false),
            Filter::IEq(path, expected) => field(row, path)
                .and_then(Value::as_str)
                .map(|s| s.eq_ignore_ascii_case(expected))
                .unwrap_or(false),
            Filter::IContains(path, needle) => field(row, path)
                .and_then(Value::as_str)
                .map(|s| s.to_ascii_lowercase().contains(&needle.to_ascii_lowercase()))
                .unwrap_or(false),
        }
    }

    fn ordered(row: &Value, path: &str, bound: &Value, check: fn(Ordering) -> bool) -> bool {
        field(row, path)
            .and_then(|v| compare(v, bound))
            .map(check)
            .unwrap_or(false)
    }
}

// Filter, sort and paginate a materialized row set in place
pub fn query_rows(mut rows: Vec<Value>, filter: Option<&Filter>, params: &QueryParams) -> Vec<Value> {
    if let Some(filter) = filter {
        rows.retain(|row| filter.matches(row));
    }

    if !params.sort.is_empty() {
        rows.sort_by(|a, b| {
            for sort in &params.sort {
                let left = field(a, &sort.field).unwrap_or(&Value::Null);
                let right = field(b, &sort.field).unwrap_or(&Value::Null);
                let ordering = compare(left, right).unwrap_or(Ordering::Equal);
                let ordering = if sort.descending {
                    ordering.reverse()
                } else {
                    ordering
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    let skipped = rows.into_iter().skip(params.skip);
    match params.limit {
        Some(limit) => skipped.take(limit).collect(),
        None => skipped.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<Value> {
        vec![
            json!({"id": 1, "header": {"author": "org/alice", "tag": "Ping"}, "sequence": 10}),
            json!({"id": 2, "header": {"author": "org/bob", "tag": "pong"}, "sequence": 20}),
            json!({"id": 3, "header": {"author": "org/alice"}, "sequence": 30}),
        ]
    }

    #[test]
    fn test_eq_on_nested_field() {
        let filter = Filter::Eq("header.author".into(), json!("org/alice"));
        let result = query_rows(rows(), Some(&filter), &QueryParams::default());
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_and_with_range() {
        let filter = Filter::And(vec![
            Filter::Eq("header.author".into(), json!("org/alice")),
            Filter::Gt("sequence".into(), json!(10)),
        ]);
        let result = query_rows(rows(), Some(&filter), &QueryParams::default());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["id"], json!(3));
    }

    #[test]
    fn test_case_insensitive_contains() {
        let filter = Filter::IContains("header.tag".into(), "PING".into());
        let result = query_rows(rows(), Some(&filter), &QueryParams::default());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["id"], json!(1));
    }

    #[test]
    fn test_sort_descending_with_pagination() {
        let params = QueryParams {
            sort: vec![Sort {
                field: "sequence".into(),
                descending: true,
            }],
            skip: 1,
            limit: Some(1),
        };
        let result = query_rows(rows(), None, &params);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["sequence"], json!(20));
    }

    #[test]
    fn test_not_filter() {
        let filter = Filter::Not(Box::new(Filter::Eq(
            "header.author".into(),
            json!("org/alice"),
        )));
        let result = query_rows(rows(), Some(&filter), &QueryParams::default());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["id"], json!(2));
    }
}
