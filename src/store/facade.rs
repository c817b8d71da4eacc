use crate::errors::{Result, StoreError};
use deadpool_redis::Pool;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, FromRedisValue};
use std::collections::HashMap;

/// One entry read from a stream: its id plus the flat field list.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl StreamEntry {
    /// Millisecond timestamp encoded in the entry id (`<ms>-<seq>`).
    pub fn timestamp_ms(&self) -> Option<i64> {
        self.id.split('-').next().and_then(|ms| ms.parse().ok())
    }
}

/// Collapses a stream entry's field list into a map, optionally keeping only
/// the named fields.
pub fn reduce_fields(entry: &StreamEntry, keep: Option<&[&str]>) -> HashMap<String, String> {
    entry
        .fields
        .iter()
        .filter(|(key, _)| keep.map_or(true, |keys| keys.contains(&key.as_str())))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Shared-store handle: a pooled connection source plus the key namespace.
/// Cloning is cheap; clones share the underlying pool.
#[derive(Clone)]
pub struct StoreHandle {
    pool: Pool,
    namespace: String,
}

impl StoreHandle {
    pub fn new(pool: Pool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Namespaced key: `{namespace}:{suffix}`.
    pub fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.namespace, suffix)
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()).into())
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(StoreError::Redis)?;
        Ok(())
    }

    /// Server time as (seconds, microseconds).
    pub async fn time(&self) -> Result<(i64, i64)> {
        let mut conn = self.conn().await?;
        let time: (i64, i64) = redis::cmd("TIME")
            .query_async(&mut conn)
            .await
            .map_err(StoreError::Redis)?;
        Ok(time)
    }

    pub async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        redis::cmd("INCR")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Redis(e).into())
    }

    pub async fn sadd(&self, key: &str, member: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        redis::cmd("SADD")
            .arg(self.key(key))
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Redis(e).into())
    }

    pub async fn srem(&self, key: &str, member: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        redis::cmd("SREM")
            .arg(self.key(key))
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Redis(e).into())
    }

    pub async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        redis::cmd("SISMEMBER")
            .arg(self.key(key))
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Redis(e).into())
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        redis::cmd("SMEMBERS")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Redis(e).into())
    }

    pub async fn zincrby(&self, key: &str, delta: i64, member: &str) -> Result<f64> {
        let mut conn = self.conn().await?;
        redis::cmd("ZINCRBY")
            .arg(self.key(key))
            .arg(delta)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Redis(e).into())
    }

    /// Lowest-scored member of a sorted set, with its score.
    pub async fn zrange_first(&self, key: &str) -> Result<Option<(String, f64)>> {
        let mut conn = self.conn().await?;
        let entries: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(self.key(key))
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(StoreError::Redis)?;
        Ok(entries.into_iter().next())
    }

    /// Member scores of a sorted set, ascending.
    pub async fn zrange_withscores(&self, key: &str) -> Result<Vec<(String, f64)>> {
        let mut conn = self.conn().await?;
        redis::cmd("ZRANGE")
            .arg(self.key(key))
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Redis(e).into())
    }

    /// Appends an entry to a capped stream (`MAXLEN ~ max_len`, oldest
    /// entries evicted). Returns the assigned entry id.
    pub async fn xadd_capped(
        &self,
        stream: &str,
        max_len: u64,
        fields: &[(&str, &str)],
    ) -> Result<String> {
        let mut conn = self.conn().await?;
        redis::cmd("XADD")
            .arg(self.key(stream))
            .arg("MAXLEN")
            .arg("~")
            .arg(max_len)
            .arg("*")
            .arg(fields)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Redis(e).into())
    }

    /// Creates a consumer group at the start of a stream, creating the stream
    /// if needed. An already-existing group (BUSYGROUP) is not an error.
    pub async fn xgroup_create_mkstream(&self, stream: &str, group: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(self.key(stream))
            .arg(group)
            .arg("0-0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(StoreError::Redis(e).into()),
        }
    }

    /// Reads a bounded batch of new entries for a consumer within a group.
    pub async fn xread_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.conn().await?;
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count);
        // A poll with nothing new replies nil rather than an empty reply.
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[self.key(stream)], &[">"], &opts)
            .await
            .map_err(StoreError::Redis)?;
        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::new();
        for stream_key in reply.keys {
            for stream_id in stream_key.ids {
                let mut fields = Vec::with_capacity(stream_id.map.len());
                for (field, value) in &stream_id.map {
                    let text: String = String::from_redis_value(value).map_err(|_| {
                        StoreError::MalformedEntry(format!(
                            "{}: field '{}' is not a string",
                            stream_id.id, field
                        ))
                    })?;
                    fields.push((field.clone(), text));
                }
                entries.push(StreamEntry {
                    id: stream_id.id.clone(),
                    fields,
                });
            }
        }
        Ok(entries)
    }

    /// Executes an atomic multi-command batch. Empty batches are a no-op.
    pub async fn execute(&self, batch: CommandBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for cmd in batch.commands {
            pipe.add_command(cmd).ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(StoreError::Redis)?;
        Ok(())
    }

    /// Like [`execute`](Self::execute) but returns each command's reply, in
    /// batch order.
    pub async fn execute_queried(&self, batch: CommandBatch) -> Result<Vec<redis::Value>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for cmd in batch.commands {
            pipe.add_command(cmd);
        }
        let replies: Vec<redis::Value> = pipe
            .query_async(&mut conn)
            .await
            .map_err(StoreError::Redis)?;
        Ok(replies)
    }
}

/// An atomic multi-command batch (MULTI/EXEC from the store's perspective).
/// Each command keeps a rendered summary so callers can log the plan the way
/// the runtime logs its close bookkeeping.
#[derive(Default)]
pub struct CommandBatch {
    commands: Vec<redis::Cmd>,
    summaries: Vec<String>,
}

impl CommandBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn summaries(&self) -> &[String] {
        &self.summaries
    }

    fn push(&mut self, cmd: redis::Cmd, summary: String) {
        self.commands.push(cmd);
        self.summaries.push(summary);
    }

    pub fn sadd(&mut self, key: &str, member: &str) {
        let mut cmd = redis::cmd("SADD");
        cmd.arg(key).arg(member);
        self.push(cmd, format!("sadd {key} {member}"));
    }

    pub fn srem(&mut self, key: &str, member: &str) {
        let mut cmd = redis::cmd("SREM");
        cmd.arg(key).arg(member);
        self.push(cmd, format!("srem {key} {member}"));
    }

    pub fn hincrby(&mut self, key: &str, field: &str, delta: i64) {
        let mut cmd = redis::cmd("HINCRBY");
        cmd.arg(key).arg(field).arg(delta);
        self.push(cmd, format!("hincrby {key} {field} {delta}"));
    }

    pub fn zadd(&mut self, key: &str, score: i64, member: &str) {
        let mut cmd = redis::cmd("ZADD");
        cmd.arg(key).arg(score).arg(member);
        self.push(cmd, format!("zadd {key} {score} {member}"));
    }

    pub fn zincrby(&mut self, key: &str, delta: i64, member: &str) {
        let mut cmd = redis::cmd("ZINCRBY");
        cmd.arg(key).arg(delta).arg(member);
        self.push(cmd, format!("zincrby {key} {delta} {member}"));
    }

    pub fn zrem(&mut self, key: &str, member: &str) {
        let mut cmd = redis::cmd("ZREM");
        cmd.arg(key).arg(member);
        self.push(cmd, format!("zrem {key} {member}"));
    }

    /// Merge-by-increment: unions the source counter into the destination,
    /// keeping what the destination already accumulated.
    pub fn zunionstore_merge(&mut self, dest: &str, src: &str) {
        let mut cmd = redis::cmd("ZUNIONSTORE");
        cmd.arg(dest).arg(2).arg(dest).arg(src);
        self.push(cmd, format!("zunionstore {dest} 2 {dest} {src}"));
    }

    pub fn del(&mut self, key: &str) {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        self.push(cmd, format!("del {key}"));
    }

    pub fn xack(&mut self, stream: &str, group: &str, id: &str) {
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group).arg(id);
        self.push(cmd, format!("xack {stream} {group} {id}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> StoreHandle {
        let pool = crate::store::create_redis_pool(&crate::config::StoreConfig::default())
            .expect("pool config");
        StoreHandle::new(pool, "test")
    }

    #[test]
    fn test_namespaced_keys() {
        let store = handle();
        assert_eq!(store.key("active:s"), "test:active:s");
        assert_eq!(store.namespace(), "test");
    }

    #[test]
    fn test_stream_entry_timestamp() {
        let entry = StreamEntry {
            id: "1691234567890-0".to_string(),
            fields: vec![],
        };
        assert_eq!(entry.timestamp_ms(), Some(1_691_234_567_890));

        let bogus = StreamEntry {
            id: "nope".to_string(),
            fields: vec![],
        };
        assert_eq!(bogus.timestamp_ms(), None);
    }

    #[test]
    fn test_reduce_fields() {
        let entry = StreamEntry {
            id: "1-0".to_string(),
            fields: vec![
                ("source".to_string(), "core".to_string()),
                ("level".to_string(), "info".to_string()),
                ("message".to_string(), "ready".to_string()),
            ],
        };
        let all = reduce_fields(&entry, None);
        assert_eq!(all.len(), 3);
        assert_eq!(all.get("level").map(String::as_str), Some("info"));

        let only_source = reduce_fields(&entry, Some(&["source"]));
        assert_eq!(only_source.len(), 1);
        assert_eq!(only_source.get("source").map(String::as_str), Some("core"));
    }

    #[test]
    fn test_batch_summaries() {
        let mut batch = CommandBatch::new();
        batch.zadd("test:mi:ingested:z", 1000, "2023-08-05T10h30");
        batch.zunionstore_merge("test:ma:all^a^b:source:z", "test:mi:leaf^a^b:source:z");
        batch.del("test:mi:leaf^a^b:source:z");
        assert_eq!(batch.len(), 3);
        assert_eq!(
            batch.summaries()[1],
            "zunionstore test:ma:all^a^b:source:z 2 test:ma:all^a^b:source:z test:mi:leaf^a^b:source:z"
        );
        assert!(!batch.is_empty());
    }
}
