//! Usage aggregation query: text rendering and result decoding
//!
//! The query joins gateway request logs to usage-detail logs on correlation id,
//! keeps only the first part of multi-part usage records and successful
//! requests, and groups by (product, model).

use crate::clients::QueryTable;
use crate::error::StageFailure;
use crate::types::{AggregationRow, BoundedSet, MAX_SET_SIZE};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashSet;

pub const COL_PRODUCT_ID: &str = "ProductId";
pub const COL_MODEL_NAME: &str = "ModelName";
pub const COL_PROMPT_TOKENS: &str = "PromptTokens";
pub const COL_COMPLETION_TOKENS: &str = "CompletionTokens";
pub const COL_TOTAL_TOKENS: &str = "TotalTokens";
pub const COL_CALL_COUNT: &str = "CallCount";
pub const COL_FIRST_SEEN: &str = "FirstSeen";
pub const COL_LAST_SEEN: &str = "LastSeen";
pub const COL_REGIONS: &str = "Regions";
pub const COL_CALLER_IPS: &str = "CallerIpAddresses";
pub const COL_CACHES: &str = "Caches";
pub const COL_BACKEND_IDS: &str = "BackendIds";

/// Result columns in output order
pub const RESULT_COLUMNS: [&str; 12] = [
    COL_PRODUCT_ID,
    COL_MODEL_NAME,
    COL_PROMPT_TOKENS,
    COL_COMPLETION_TOKENS,
    COL_TOTAL_TOKENS,
    COL_CALL_COUNT,
    COL_FIRST_SEEN,
    COL_LAST_SEEN,
    COL_REGIONS,
    COL_CALLER_IPS,
    COL_CACHES,
    COL_BACKEND_IDS,
];

const SCHEMA_MISMATCH: &str = "SchemaMismatch";

/// Default usage aggregation query definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageQuery {
    pub request_table: String,
    pub usage_table: String,
    pub lookback: Duration,
}

impl UsageQuery {
    pub fn new(lookback: Duration) -> Self {
        Self {
            request_table: "ApiManagementGatewayLogs".to_string(),
            usage_table: "ApiManagementGatewayLlmLog".to_string(),
            lookback,
        }
    }

    /// Render the query text
    pub fn render(&self) -> String {
        let hours = self.lookback.num_hours().max(1);
        format!(
            "{requests}\n\
             | where TimeGenerated > ago({hours}h)\n\
             | where IsRequestSuccess == true\n\
             | join kind=inner (\n    {usage}\n    | where SequenceNumber == 0\n) on CorrelationId\n\
             | summarize\n    \
             {prompt} = sum(PromptTokens),\n    \
             {completion} = sum(CompletionTokens),\n    \
             {total} = sum(TotalTokens),\n    \
             {calls} = count(),\n    \
             {first} = min(TimeGenerated),\n    \
             {last} = max(TimeGenerated),\n    \
             {regions} = make_set(Region, {cap}),\n    \
             {ips} = make_set(CallerIpAddress, {cap}),\n    \
             {caches} = make_set(Cache, {cap}),\n    \
             {backends} = make_set(BackendId, {cap})\n    \
             by {product}, {model}\n\
             | order by {total} desc",
            requests = self.request_table,
            usage = self.usage_table,
            hours = hours,
            cap = MAX_SET_SIZE,
            prompt = COL_PROMPT_TOKENS,
            completion = COL_COMPLETION_TOKENS,
            total = COL_TOTAL_TOKENS,
            calls = COL_CALL_COUNT,
            first = COL_FIRST_SEEN,
            last = COL_LAST_SEEN,
            regions = COL_REGIONS,
            ips = COL_CALLER_IPS,
            caches = COL_CACHES,
            backends = COL_BACKEND_IDS,
            product = COL_PRODUCT_ID,
            model = COL_MODEL_NAME,
        )
    }
}

/// Decode a result table into rows, ordered by total tokens descending
///
/// Rows with equal totals keep the order the store returned them in.
pub fn decode_rows(table: &QueryTable) -> Result<Vec<AggregationRow>, StageFailure> {
    let mut indices = [0usize; 12];
    for (slot, name) in indices.iter_mut().zip(RESULT_COLUMNS) {
        *slot = table.column_index(name).ok_or_else(|| {
            StageFailure::failed(SCHEMA_MISMATCH, format!("Result is missing column '{}'", name))
        })?;
    }
    let [product, model, prompt, completion, total, calls, first, last, regions, ips, caches, backends] =
        indices;

    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(table.rows.len());

    for (line, values) in table.rows.iter().enumerate() {
        let cells = RowCells { values, line };
        let row = AggregationRow {
            product_id: cells.string(product, COL_PRODUCT_ID)?,
            model_name: cells.string(model, COL_MODEL_NAME)?,
            prompt_tokens: cells.count(prompt, COL_PROMPT_TOKENS)?,
            completion_tokens: cells.count(completion, COL_COMPLETION_TOKENS)?,
            total_tokens: cells.count(total, COL_TOTAL_TOKENS)?,
            call_count: cells.count(calls, COL_CALL_COUNT)?,
            first_seen: cells.timestamp(first, COL_FIRST_SEEN)?,
            last_seen: cells.timestamp(last, COL_LAST_SEEN)?,
            regions: cells.set(regions, COL_REGIONS)?,
            caller_ips: cells.set(ips, COL_CALLER_IPS)?,
            caches: cells.set(caches, COL_CACHES)?,
            backend_ids: cells.set(backends, COL_BACKEND_IDS)?,
        };

        if !seen.insert((row.product_id.clone(), row.model_name.clone())) {
            return Err(StageFailure::failed(
                "DuplicateGroup",
                format!(
                    "Group ({}, {}) appears more than once",
                    row.product_id, row.model_name
                ),
            ));
        }
        rows.push(row);
    }

    // Vec::sort_by is stable
    rows.sort_by(|a, b| b.total_tokens.cmp(&a.total_tokens));
    Ok(rows)
}

/// Typed access to the cells of one result row
struct RowCells<'a> {
    values: &'a [Value],
    line: usize,
}

impl<'a> RowCells<'a> {
    fn cell(&self, index: usize, column: &str) -> Result<&'a Value, StageFailure> {
        self.values.get(index).ok_or_else(|| {
            StageFailure::failed(
                SCHEMA_MISMATCH,
                format!("Row {} has no value for column '{}'", self.line, column),
            )
        })
    }

    fn mismatch(&self, column: &str, expected: &str, value: &Value) -> StageFailure {
        StageFailure::failed(
            SCHEMA_MISMATCH,
            format!(
                "Row {} column '{}': expected {}, got {}",
                self.line, column, expected, value
            ),
        )
    }

    fn string(&self, index: usize, column: &str) -> Result<String, StageFailure> {
        Ok(as_string(self.cell(index, column)?))
    }

    fn count(&self, index: usize, column: &str) -> Result<u64, StageFailure> {
        let value = self.cell(index, column)?;
        let parsed = match value {
            Value::Null => Some(0),
            Value::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| f as u64)
            }),
            Value::String(s) => s.parse::<u64>().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| self.mismatch(column, "a non-negative integer", value))
    }

    fn timestamp(&self, index: usize, column: &str) -> Result<DateTime<Utc>, StageFailure> {
        let value = self.cell(index, column)?;
        value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| self.mismatch(column, "an RFC 3339 timestamp", value))
    }

    /// Multi-value columns arrive either as JSON arrays or as JSON-encoded strings
    fn set(&self, index: usize, column: &str) -> Result<BoundedSet, StageFailure> {
        let value = self.cell(index, column)?;
        match value {
            Value::Null => Ok(BoundedSet::new()),
            Value::Array(items) => Ok(items.iter().map(as_string).collect()),
            Value::String(s) if s.trim().is_empty() => Ok(BoundedSet::new()),
            Value::String(s) => serde_json::from_str::<Vec<Value>>(s)
                .map(|items| items.iter().map(as_string).collect())
                .map_err(|_| self.mismatch(column, "an array", value)),
            _ => Err(self.mismatch(column, "an array", value)),
        }
    }
}

fn as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::QueryColumn;
    use serde_json::json;

    fn table(rows: Vec<Vec<Value>>) -> QueryTable {
        QueryTable {
            name: "PrimaryResult".to_string(),
            columns: RESULT_COLUMNS
                .iter()
                .map(|name| QueryColumn::new(*name, "string"))
                .collect(),
            rows,
        }
    }

    fn row(product: &str, model: &str, total: u64) -> Vec<Value> {
        vec![
            json!(product),
            json!(model),
            json!(total / 2),
            json!(total - total / 2),
            json!(total),
            json!(3),
            json!("2024-03-01T08:00:00Z"),
            json!("2024-03-01T20:30:00Z"),
            json!(["eastus", "westus"]),
            json!("[\"10.0.0.1\"]"),
            json!(["HIT", "MISS"]),
            Value::Null,
        ]
    }

    #[test]
    fn test_render_contains_join_and_filters() {
        let text = UsageQuery::new(Duration::hours(24)).render();
        assert!(text.contains("ago(24h)"));
        assert!(text.contains("join kind=inner"));
        assert!(text.contains("SequenceNumber == 0"));
        assert!(text.contains("IsRequestSuccess == true"));
        assert!(text.contains("make_set(Region, 8)"));
        assert!(text.contains("by ProductId, ModelName"));
        assert!(text.contains("order by TotalTokens desc"));
    }

    #[test]
    fn test_decode_orders_by_total_tokens_desc() {
        let rows = decode_rows(&table(vec![
            row("P1", "gpt-x", 500),
            row("P2", "gpt-y", 1200),
            row("P3", "gpt-x", 500),
        ]))
        .unwrap();

        let keys: Vec<_> = rows.iter().map(|r| r.product_id.as_str()).collect();
        assert_eq!(keys, vec!["P2", "P1", "P3"]);
    }

    #[test]
    fn test_decode_multi_value_columns() {
        let rows = decode_rows(&table(vec![row("P1", "gpt-x", 10)])).unwrap();
        let first = &rows[0];

        assert_eq!(first.regions.iter().collect::<Vec<_>>(), vec!["eastus", "westus"]);
        assert_eq!(first.caller_ips.iter().collect::<Vec<_>>(), vec!["10.0.0.1"]);
        assert!(first.backend_ids.is_empty());
        assert_eq!(first.call_count, 3);
        assert_eq!(first.prompt_tokens + first.completion_tokens, 10);
    }

    #[test]
    fn test_decode_caps_oversized_sets() {
        let mut values = row("P1", "gpt-x", 10);
        values[8] = json!((0..15).map(|i| format!("region-{}", i)).collect::<Vec<_>>());

        let rows = decode_rows(&table(vec![values])).unwrap();
        assert_eq!(rows[0].regions.len(), MAX_SET_SIZE);
    }

    #[test]
    fn test_decode_tolerates_column_order() {
        let mut t = table(vec![]);
        t.columns.reverse();
        let mut values = row("P1", "gpt-x", 42);
        values.reverse();
        t.rows.push(values);

        let rows = decode_rows(&t).unwrap();
        assert_eq!(rows[0].total_tokens, 42);
        assert_eq!(rows[0].model_name, "gpt-x");
    }

    #[test]
    fn test_decode_missing_column() {
        let mut t = table(vec![]);
        t.columns.retain(|c| c.name != COL_CALL_COUNT);

        let err = decode_rows(&t).unwrap_err();
        assert_eq!(err.code, "SchemaMismatch");
        assert!(err.message.contains("CallCount"));
    }

    #[test]
    fn test_decode_rejects_duplicate_groups() {
        let err = decode_rows(&table(vec![row("P1", "gpt-x", 1), row("P1", "gpt-x", 2)]))
            .unwrap_err();
        assert_eq!(err.code, "DuplicateGroup");
    }

    #[test]
    fn test_decode_rejects_bad_timestamp() {
        let mut values = row("P1", "gpt-x", 10);
        values[6] = json!("yesterday");

        let err = decode_rows(&table(vec![values])).unwrap_err();
        assert_eq!(err.code, "SchemaMismatch");
    }

    #[test]
    fn test_decode_numeric_strings_and_floats() {
        let mut values = row("P1", "gpt-x", 10);
        values[2] = json!("4");
        values[3] = json!(6.0);

        let rows = decode_rows(&table(vec![values])).unwrap();
        assert_eq!(rows[0].prompt_tokens, 4);
        assert_eq!(rows[0].completion_tokens, 6);
    }
}
