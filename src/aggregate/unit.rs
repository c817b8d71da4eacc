use crate::errors::{IngestError, Result};
use crate::runtime::{Hooks, StreamBinding, UnitContext, UnitModule, UnitSpec};
use crate::store::{reduce_fields, CommandBatch, StoreHandle, StreamEntry};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::periods;

pub const SERVICE_KEY: &str = "monitor-aggregator";

/// The fact keys counted per (period, SumKey).
const FACT_KEYS: [&str; 2] = ["source", "level"];

/// In-memory tallies, observability only: not persisted, reset on restart.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Tallies {
    pub processed: u64,
    pub levels: HashMap<String, u64>,
    pub sources: HashMap<String, u64>,
}

struct IngestRecord {
    source: String,
    level: String,
}

struct IngestPlan {
    batch: CommandBatch,
    records: Vec<IngestRecord>,
}

impl std::fmt::Debug for IngestPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestPlan")
            .field("summaries", &self.batch.summaries())
            .field("records", &self.records.len())
            .finish()
    }
}

/// The canonical stream-ingestion-and-aggregation unit: consumes the monitor
/// event stream through a consumer group, maintains per-leaf-period counters,
/// and periodically rolls them into the time/category hierarchy.
pub struct MonitorAggregator;

#[async_trait]
impl UnitModule for MonitorAggregator {
    fn spec(&self) -> UnitSpec {
        UnitSpec {
            name: SERVICE_KEY,
            input_stream: Some(StreamBinding {
                key: "monitor:x".to_string(),
            }),
            ..UnitSpec::default()
        }
    }

    async fn setup(&self, ctx: Arc<UnitContext>) -> Result<Hooks> {
        let store_time = ctx.store.time().await?;
        ctx.monitor.info_data(
            json!({ "storeTime": [store_time.0, store_time.1] }),
            "aggregator setup",
        );

        let tallies = Arc::new(Mutex::new(Tallies::default()));
        // Consumer identity within the group: the shared instance id, or a
        // random name for launches that never registered.
        let consumer = if ctx.instance_id > 0 {
            ctx.instance_id.to_string()
        } else {
            uuid::Uuid::new_v4().to_string()
        };

        let mut hooks = Hooks::new();

        {
            let ctx = ctx.clone();
            hooks.test_setup = Some(Box::new(move || {
                let ctx = ctx.clone();
                Box::pin(async move {
                    let stream = ctx.config.base.monitor.stream.clone();
                    ctx.store
                        .xgroup_create_mkstream(&stream, &ctx.service_key)
                        .await
                })
            }));
        }

        {
            let ctx = ctx.clone();
            hooks.on_error = Some(Box::new(move |err| {
                let ctx = ctx.clone();
                Box::pin(async move {
                    ctx.monitor
                        .info_data(json!({ "err": err.to_string() }), "error");
                    Ok(())
                })
            }));
        }

        {
            let ctx = ctx.clone();
            let tallies = tallies.clone();
            hooks.input_stream = Some(Box::new(move || {
                let ctx = ctx.clone();
                let tallies = tallies.clone();
                let consumer = consumer.clone();
                Box::pin(async move { ingest(ctx, tallies, consumer).await })
            }));
        }

        {
            let ctx = ctx.clone();
            let tallies = tallies.clone();
            hooks.tick = Some(Box::new(move || {
                let ctx = ctx.clone();
                let tallies = tallies.clone();
                Box::pin(async move { rollup(ctx, tallies).await })
            }));
        }

        Ok(hooks)
    }
}

/// Ingestion step: read a bounded batch for this consumer, then issue every
/// mutation it implies as one atomic batch — the period's ingestion
/// timestamp, its touched SumKeys, the fine-grained counter increments, and
/// the entry acknowledgements. An entry's ack lands exactly when its effects
/// do.
async fn ingest(
    ctx: Arc<UnitContext>,
    tallies: Arc<Mutex<Tallies>>,
    consumer: String,
) -> Result<()> {
    let config = &ctx.config.base;
    let entries = ctx
        .store
        .xread_group(
            &config.monitor.stream,
            &ctx.service_key,
            &consumer,
            config.input_stream.read_count,
        )
        .await?;
    if entries.is_empty() {
        return Ok(());
    }

    let now_ms = Utc::now().timestamp_millis();
    let plan = plan_ingest(
        &ctx.store,
        &config.monitor.stream,
        &ctx.service_key,
        &config.monitor.source_prefix,
        &entries,
        now_ms,
    )?;
    debug!(
        "[{}] ingest entries[{}] commands[{}]",
        ctx.service_key,
        entries.len(),
        plan.batch.len()
    );
    ctx.store.execute(plan.batch).await?;

    let mut tallies = tallies.lock().expect("tallies lock poisoned");
    tallies.processed += plan.records.len() as u64;
    for record in plan.records {
        *tallies.levels.entry(record.level).or_insert(0) += 1;
        *tallies.sources.entry(record.source).or_insert(0) += 1;
    }
    Ok(())
}

fn plan_ingest(
    store: &StoreHandle,
    stream: &str,
    group: &str,
    source_prefix: &str,
    entries: &[StreamEntry],
    now_ms: i64,
) -> Result<IngestPlan> {
    let mut batch = CommandBatch::new();
    let mut records = Vec::with_capacity(entries.len());
    let index_key = store.key(periods::ingest_index_key());
    let stream_key = store.key(stream);

    for entry in entries {
        let ts_ms = entry
            .timestamp_ms()
            .ok_or_else(|| IngestError::BadEntryId(entry.id.clone()))?;
        let fields = reduce_fields(entry, None);
        let raw_source = fields
            .get("source")
            .ok_or_else(|| IngestError::MissingField(entry.id.clone(), "source"))?;
        let level = fields
            .get("level")
            .ok_or_else(|| IngestError::MissingField(entry.id.clone(), "level"))?
            .clone();

        let leaf = periods::leaf_period(ts_ms);
        let source = if source_prefix.is_empty() {
            raw_source.clone()
        } else {
            format!("{source_prefix}/{raw_source}")
        };
        debug!("ingesting {} leaf={leaf} source={source} level={level}", entry.id);

        batch.zadd(&index_key, now_ms, &leaf);
        let facts = [("source", source.clone()), ("level", level.clone())];
        for sum_key in periods::sum_keys(&source, &level) {
            batch.sadd(&store.key(&periods::touched_key(&leaf)), &sum_key);
            // A fact whose value is already embedded in the SumKey carries
            // no extra information at that granularity.
            for (fact_key, value) in &facts {
                if !sum_key.contains(&format!("^{value}")) {
                    batch.zincrby(
                        &store.key(&periods::fine_counter_key(&leaf, &sum_key, fact_key)),
                        1,
                        value,
                    );
                }
            }
        }
        batch.xack(&stream_key, group, &entry.id);
        records.push(IngestRecord { source, level });
    }

    Ok(IngestPlan { batch, records })
}

/// Rollup step: take the oldest pending leaf period; once it has aged past
/// the configured lag, merge each of its counters into every coarser bucket
/// and prune the leaf-period state. The read-decide-write sequence is not
/// atomic across itself — at most one live instance is expected to roll up
/// for a given unit key.
async fn rollup(ctx: Arc<UnitContext>, tallies: Arc<Mutex<Tallies>>) -> Result<()> {
    let config = &ctx.config.base;
    let oldest = ctx.store.zrange_first(periods::ingest_index_key()).await?;
    let Some((leaf, ingested_score)) = oldest else {
        return Ok(());
    };

    let now_ms = Utc::now().timestamp_millis();
    if !periods::rollup_due(ingested_score as i64, config.aggregation.lag_ms, now_ms) {
        return Ok(());
    }

    let sum_keys = ctx.store.smembers(&periods::touched_key(&leaf)).await?;
    if sum_keys.is_empty() {
        // An index entry with no touched SumKeys would be re-read forever.
        let mut batch = CommandBatch::new();
        batch.zrem(&ctx.store.key(periods::ingest_index_key()), &leaf);
        ctx.store.execute(batch).await?;
        return Ok(());
    }

    ctx.monitor.info_data(
        json!({ "leafPeriod": leaf, "ingestedScore": ingested_score, "sumKeys": sum_keys }),
        "rollup period",
    );
    let batch = plan_rollup(&ctx.store, &leaf, &sum_keys);
    ctx.store.execute(batch).await?;

    let snapshot = tallies.lock().expect("tallies lock poisoned").clone();
    ctx.monitor
        .info_data(json!({ "leafPeriod": leaf, "counters": snapshot }), "rollup");
    Ok(())
}

fn plan_rollup(store: &StoreHandle, leaf: &str, sum_keys: &[String]) -> CommandBatch {
    let mut batch = CommandBatch::new();
    for sum_key in sum_keys {
        for fact_key in FACT_KEYS {
            let fine = store.key(&periods::fine_counter_key(leaf, sum_key, fact_key));
            for period in periods::aggregation_periods(leaf) {
                batch.zunionstore_merge(
                    &store.key(&periods::rollup_counter_key(&period, sum_key, fact_key)),
                    &fine,
                );
            }
            batch.del(&fine);
        }
    }
    batch.del(&store.key(&periods::touched_key(leaf)));
    batch.zrem(&store.key(periods::ingest_index_key()), leaf);
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn handle() -> StoreHandle {
        let pool = crate::store::create_redis_pool(&crate::config::StoreConfig::default())
            .expect("pool config");
        StoreHandle::new(pool, "t")
    }

    fn entry(ts_ms: i64, source: &str, level: &str) -> StreamEntry {
        StreamEntry {
            id: format!("{ts_ms}-0"),
            fields: vec![
                ("source".to_string(), source.to_string()),
                ("level".to_string(), level.to_string()),
                ("data".to_string(), "{}".to_string()),
                ("message".to_string(), "m".to_string()),
            ],
        }
    }

    fn known_ts_ms() -> i64 {
        Utc.with_ymd_and_hms(2023, 8, 5, 10, 30, 45)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_plan_ingest_single_entry_cross_product() {
        let store = handle();
        let entries = vec![entry(known_ts_ms(), "a/b", "info")];
        let plan = plan_ingest(&store, "monitor:x", "agg", "", &entries, 1_000).unwrap();
        let summaries = plan.batch.summaries();

        // index timestamp + 6 touched marks + 6 source incrs + 3 level incrs + 1 ack
        assert_eq!(plan.batch.len(), 17);
        assert_eq!(summaries[0], "zadd t:mi:ingested:z 1000 2023-08-05T10h30");

        for sum_key in ["a/b^info", "a/b^all", "a^info", "a^all", "all^info", "all^all"] {
            assert!(
                summaries
                    .iter()
                    .any(|s| *s == format!("sadd t:mi:2023-08-05T10h30:sum:s {sum_key}")),
                "missing touched mark for {sum_key}"
            );
        }

        // The source fact is not embedded in any SumKey, so it is counted at
        // every granularity.
        assert!(summaries
            .iter()
            .any(|s| s == "zincrby t:mi:2023-08-05T10h30^all^all:source:z 1 a/b"));
        // The level fact is embedded wherever the level category is literal.
        assert!(!summaries
            .iter()
            .any(|s| s == "zincrby t:mi:2023-08-05T10h30^a/b^info:level:z 1 info"));
        assert!(summaries
            .iter()
            .any(|s| s == "zincrby t:mi:2023-08-05T10h30^a/b^all:level:z 1 info"));

        assert!(summaries
            .iter()
            .any(|s| s.starts_with("xack t:monitor:x agg ")));
    }

    #[test]
    fn test_plan_ingest_applies_source_prefix() {
        let store = handle();
        let entries = vec![entry(known_ts_ms(), "core", "warn")];
        let plan = plan_ingest(&store, "monitor:x", "agg", "lf", &entries, 1_000).unwrap();
        assert_eq!(plan.records[0].source, "lf/core");
        assert!(plan
            .batch
            .summaries()
            .iter()
            .any(|s| *s == "sadd t:mi:2023-08-05T10h30:sum:s lf/core^warn"));
        // The prefixed source splits at the prefix slash.
        assert!(plan
            .batch
            .summaries()
            .iter()
            .any(|s| *s == "sadd t:mi:2023-08-05T10h30:sum:s lf^warn"));
    }

    #[test]
    fn test_plan_ingest_rejects_bad_entry_id() {
        let store = handle();
        let mut bad = entry(known_ts_ms(), "core", "info");
        bad.id = "bogus".to_string();
        let err = plan_ingest(&store, "monitor:x", "agg", "", &[bad], 0).unwrap_err();
        assert_eq!(err.code(), "ingest");
    }

    #[test]
    fn test_plan_ingest_rejects_missing_fields() {
        let store = handle();
        let mut incomplete = entry(known_ts_ms(), "core", "info");
        incomplete.fields.retain(|(key, _)| key != "level");
        let err = plan_ingest(&store, "monitor:x", "agg", "", &[incomplete], 0).unwrap_err();
        assert_eq!(err.code(), "ingest");
    }

    #[test]
    fn test_plan_rollup_merges_and_prunes() {
        let store = handle();
        let leaf = "2023-08-05T10h30";
        let sum_keys = vec!["a^all".to_string()];
        let batch = plan_rollup(&store, leaf, &sum_keys);
        let summaries = batch.summaries();

        // 6 periods × 2 facts merges + 2 fine deletes + touched delete + index removal
        assert_eq!(batch.len(), 16);

        // Merge-by-increment: the destination participates in its own union.
        assert!(summaries.iter().any(|s| s
            == "zunionstore t:ma:all^a^all:source:z 2 t:ma:all^a^all:source:z t:mi:2023-08-05T10h30^a^all:source:z"));
        assert!(summaries.iter().any(|s| s
            == "zunionstore t:ma:2023-08^a^all:level:z 2 t:ma:2023-08^a^all:level:z t:mi:2023-08-05T10h30^a^all:level:z"));

        // Leaf-period state is transient: counters, touched set, and the
        // ingestion-timestamp record all go.
        assert!(summaries
            .iter()
            .any(|s| s == "del t:mi:2023-08-05T10h30^a^all:source:z"));
        assert!(summaries.iter().any(|s| s == "del t:mi:2023-08-05T10h30:sum:s"));
        assert_eq!(
            summaries.last().map(String::as_str),
            Some("zrem t:mi:ingested:z 2023-08-05T10h30")
        );
    }

    #[test]
    fn test_spec_declares_input_stream() {
        let spec = MonitorAggregator.spec();
        assert_eq!(spec.name, SERVICE_KEY);
        assert_eq!(spec.input_stream.unwrap().key, "monitor:x");
    }
}
