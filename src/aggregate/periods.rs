use chrono::{TimeZone, Utc};

/// Coarsest bucket: everything ever ingested.
pub const ALL_PERIOD: &str = "all";

/// Minute-granularity bucket for an event timestamp: UTC ISO-8601 truncated
/// to the minute, with the hour/minute colon replaced so the string stays a
/// single store-key token, e.g. `2023-08-05T10h30`.
pub fn leaf_period(ts_ms: i64) -> String {
    let ts = Utc
        .timestamp_millis_opt(ts_ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap());
    ts.format("%Y-%m-%dT%Hh%M").to_string()
}

/// The strict containment hierarchy over a leaf period: the leaf itself,
/// its hour, day, month, and year prefixes, then "all".
pub fn aggregation_periods(leaf_period: &str) -> Vec<String> {
    let prefix = |len: usize| leaf_period.chars().take(len).collect::<String>();
    vec![
        leaf_period.to_string(),
        prefix(13),
        prefix(10),
        prefix(7),
        prefix(4),
        ALL_PERIOD.to_string(),
    ]
}

/// Collapses a `/`-delimited category to its granularities: the full value,
/// the prefix before the first slash (when present), and "all".
pub fn split_category(category: &str) -> Vec<String> {
    match category.find('/') {
        Some(index) => vec![
            category.to_string(),
            category[..index].to_string(),
            ALL_PERIOD.to_string(),
        ],
        None => vec![category.to_string(), ALL_PERIOD.to_string()],
    }
}

/// Every granularity a (source, level) fact combination is counted at: the
/// cross product of both category splits, each pair joined by `^`.
pub fn sum_keys(source: &str, level: &str) -> Vec<String> {
    split_category(source)
        .iter()
        .flat_map(|source_category| {
            split_category(level)
                .into_iter()
                .map(move |level_category| format!("{source_category}^{level_category}"))
        })
        .collect()
}

pub fn ingest_index_key() -> &'static str {
    "mi:ingested:z"
}

pub fn touched_key(leaf_period: &str) -> String {
    format!("mi:{leaf_period}:sum:s")
}

pub fn fine_counter_key(leaf_period: &str, sum_key: &str, fact_key: &str) -> String {
    format!("mi:{leaf_period}^{sum_key}:{fact_key}:z")
}

pub fn rollup_counter_key(period: &str, sum_key: &str, fact_key: &str) -> String {
    format!("ma:{period}^{sum_key}:{fact_key}:z")
}

/// A leaf period is due for rollup once its latest ingestion is at least
/// `lag_ms` old: in-flight ingestion for the period gets that margin to
/// settle before its counters move.
pub fn rollup_due(ingested_score_ms: i64, lag_ms: u64, now_ms: i64) -> bool {
    ingested_score_ms + lag_ms as i64 <= now_ms
}
