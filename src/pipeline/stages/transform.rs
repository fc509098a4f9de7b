use crate::error::{ReportError, ReportResult};
use crate::pipeline::{PipelineStage, RunContext};
use crate::state_machine::RunPhase;
use crate::types::{AggregationRow, BoundedSet, ReportDocument};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write;
use tracing::info;

/// Report columns, in output order
pub const CSV_COLUMNS: [&str; 12] = [
    "productId",
    "modelName",
    "promptTokens",
    "completionTokens",
    "totalTokens",
    "callCount",
    "firstSeen",
    "lastSeen",
    "regions",
    "callerIps",
    "caches",
    "backendIds",
];

/// Separator for multi-value cells
pub const LIST_SEPARATOR: char = ';';

/// Escapes a literal separator or backslash inside a multi-value entry
pub const LIST_ESCAPE: char = '\\';

const LINE_END: &str = "\r\n";

/// Stage that renders the aggregation rows as a CSV document
///
/// # Context Requirements
/// - Input: `rows` from the query stage
///
/// # Context Outputs
/// - `document` - the CSV report
pub struct TransformStage;

impl TransformStage {
    pub const NAME: &'static str = "CreateCsvReport";

    pub fn new() -> Self {
        Self
    }
}

impl Default for TransformStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PipelineStage for TransformStage {
    async fn execute(&self, context: &mut RunContext) -> ReportResult<()> {
        let document = render_csv(context.rows()?)?;

        info!(
            target: "pipeline::transform",
            run_id = %context.run_id(),
            "Rendered report with {} rows, {} bytes",
            document.row_count(),
            document.as_bytes().len()
        );

        context.set_document(document);
        Ok(())
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn phase(&self) -> RunPhase {
        RunPhase::Transforming
    }
}

/// Render rows as CSV: a header line, then one line per row in input order
///
/// Fields are quoted per RFC 4180 when they contain a comma, quote or line
/// break. Multi-value fields are joined with `;`, and a `;` or `\` inside an
/// entry is prefixed with `\`. Timestamps are RFC 3339 UTC. Text containing
/// NUL cannot be encoded and fails the whole document.
pub fn render_csv(rows: &[AggregationRow]) -> ReportResult<ReportDocument> {
    let mut out = String::new();
    write_row(&mut out, CSV_COLUMNS.iter().map(|c| c.to_string()))?;

    for (line, row) in rows.iter().enumerate() {
        let fields = [
            text(&row.product_id, line, CSV_COLUMNS[0])?,
            text(&row.model_name, line, CSV_COLUMNS[1])?,
            row.prompt_tokens.to_string(),
            row.completion_tokens.to_string(),
            row.total_tokens.to_string(),
            row.call_count.to_string(),
            timestamp(&row.first_seen),
            timestamp(&row.last_seen),
            list(&row.regions, line, CSV_COLUMNS[8])?,
            list(&row.caller_ips, line, CSV_COLUMNS[9])?,
            list(&row.caches, line, CSV_COLUMNS[10])?,
            list(&row.backend_ids, line, CSV_COLUMNS[11])?,
        ];
        write_row(&mut out, fields.into_iter())?;
    }

    Ok(ReportDocument::new(out, rows.len()))
}

fn write_row(out: &mut String, fields: impl Iterator<Item = String>) -> ReportResult<()> {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_field(out, &field).map_err(|e| ReportError::EncodingFailed(e.to_string()))?;
    }
    out.push_str(LINE_END);
    Ok(())
}

fn write_field(out: &mut String, field: &str) -> std::fmt::Result {
    if field.contains([',', '"', '\n', '\r']) {
        write!(out, "\"{}\"", field.replace('"', "\"\""))
    } else {
        out.write_str(field)
    }
}

fn text(value: &str, line: usize, column: &str) -> ReportResult<String> {
    if value.contains('\0') {
        return Err(ReportError::EncodingFailed(format!(
            "NUL character in {} of row {}",
            column,
            line + 1
        )));
    }
    Ok(value.to_string())
}

fn list(values: &BoundedSet, line: usize, column: &str) -> ReportResult<String> {
    let mut joined = String::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            joined.push(LIST_SEPARATOR);
        }
        for ch in text(value, line, column)?.chars() {
            if ch == LIST_SEPARATOR || ch == LIST_ESCAPE {
                joined.push(LIST_ESCAPE);
            }
            joined.push(ch);
        }
    }
    Ok(joined)
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
