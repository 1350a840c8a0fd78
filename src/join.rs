use crate::error::PipelineError;
use crate::types::{GeometryFeature, TabularRow};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

/// Attaches each feature's measurement under `variable`.
///
/// Rows are indexed by GEOID in a single pass, so a repeated GEOID resolves
/// to the last row seen. Features without a matching row get `0`. A feature
/// without an identifier aborts the whole join.
pub fn join_rows(
    rows: &[TabularRow],
    features: &mut [GeometryFeature],
    id_field: &str,
    variable: &str,
) -> Result<JoinSummary, PipelineError> {
    let lookup: HashMap<&str, f64> = rows
        .iter()
        .map(|row| (row.geoid.as_str(), row.value))
        .collect();

    let mut summary = JoinSummary::default();
    for (index, feature) in features.iter_mut().enumerate() {
        let id = feature.identifier(index, id_field)?;
        let value = match lookup.get(id.as_str()) {
            Some(v) => {
                summary.matched += 1;
                *v
            }
            None => {
                debug!(geoid = %id, "no tabular row for feature");
                summary.unmatched += 1;
                0.0
            }
        };
        feature.attributes.insert(variable.to_string(), number(value));
    }

    info!(
        rows = rows.len(),
        distinct = lookup.len(),
        matched = summary.matched,
        unmatched = summary.unmatched,
        "joined tabular rows onto geometry"
    );
    Ok(summary)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JoinSummary {
    pub matched: usize,
    pub unmatched: usize,
}

// Non-finite values have no JSON form; they fall back to 0 like unparsable census cells.
fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or_else(|| Value::from(0.0))
}
