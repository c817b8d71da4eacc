//! Live-instance bookkeeping in the shared store.
//!
//! Registration and close accounting are best-effort: a failed write is
//! logged and swallowed so registry state can never block startup or
//! shutdown. Liveness is advisory set-membership, not a fencing protocol.

use crate::errors::{Error, RegistryError};
use crate::store::{CommandBatch, StoreHandle};
use log::{info, warn};

const ACTIVE_SET: &str = "active:s";
const COUNTER_HASH: &str = "counter:h";
const CLOSE_COUNTERS: &str = "counters:z";
const ERROR_COUNTERS: &str = "error:counters:z";
const INSTANCE_SEQ: &str = "instance:i";

pub struct InstanceRegistry {
    store: StoreHandle,
    member: String,
    instance_id: i64,
    restart_count: i64,
    registered: bool,
}

impl InstanceRegistry {
    /// Registers this process: draws a fresh instance id from the store's
    /// sequence, then increments the restart counter and joins the live set
    /// in one atomic batch. Returns with the new restart count.
    pub async fn register(store: StoreHandle) -> crate::errors::Result<Self> {
        let member = std::process::id().to_string();
        let instance_id = store.incr(INSTANCE_SEQ).await?;

        let mut batch = CommandBatch::new();
        batch.hincrby(&store.key(COUNTER_HASH), "restart", 1);
        batch.sadd(&store.key(ACTIVE_SET), &member);
        let replies = store.execute_queried(batch).await?;
        let restart_count = replies
            .first()
            .and_then(|value| redis::from_redis_value::<i64>(value).ok())
            .unwrap_or(0);

        info!(
            "instance registered: id={instance_id} member={member} restart_count={restart_count}"
        );
        Ok(Self {
            store,
            member,
            instance_id,
            restart_count,
            registered: true,
        })
    }

    /// A handle that never joined the live set and holds no store-assigned
    /// id. Set-membership is meaningless for it, so liveness reads report
    /// active and close bookkeeping writes nothing.
    pub fn detached(store: StoreHandle) -> Self {
        Self {
            store,
            member: std::process::id().to_string(),
            instance_id: 0,
            restart_count: 0,
            registered: false,
        }
    }

    pub fn instance_id(&self) -> i64 {
        self.instance_id
    }

    pub fn restart_count(&self) -> i64 {
        self.restart_count
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    /// Membership test against the live set — the scheduling loop's external
    /// cancellation signal. Liveness is advisory, so a store failure logs a
    /// warning and reports this instance as still active.
    pub async fn is_active(&self) -> bool {
        if !self.registered {
            return true;
        }
        match self.store.sismember(ACTIVE_SET, &self.member).await {
            Ok(active) => active,
            Err(err) => {
                let err = RegistryError::ReadFailed(err.into());
                warn!("liveness check failed, assuming active: {err}");
                true
            }
        }
    }

    /// Removes this process from the live set and records the closing
    /// outcome in the close counter and error-code histogram. Best-effort:
    /// failures are logged, never propagated.
    pub async fn close(&self, outcome: Option<&Error>) {
        let code = close_code(outcome);
        if !self.registered {
            info!("instance never registered, close code {code}");
            return;
        }
        let mut batch = CommandBatch::new();
        batch.srem(&self.store.key(ACTIVE_SET), &self.member);
        batch.zincrby(&self.store.key(CLOSE_COUNTERS), 1, "close");
        batch.zincrby(&self.store.key(ERROR_COUNTERS), 1, code);
        info!("closing instance registry: {:?}", batch.summaries());
        if let Err(err) = self.store.execute(batch).await {
            let err = RegistryError::WriteFailed(err.into());
            warn!("registry close bookkeeping failed: {err}");
        }
    }
}

/// The histogram bucket recorded for a closing outcome.
pub fn close_code(outcome: Option<&Error>) -> &'static str {
    outcome.map_or("ok", |err| err.code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ConfigError, HookError};

    #[test]
    fn test_close_code_ok_without_error() {
        assert_eq!(close_code(None), "ok");
    }

    #[test]
    fn test_close_code_uses_kind_label() {
        let config_err = Error::from(ConfigError::MissingUnitName);
        assert_eq!(close_code(Some(&config_err)), "config");

        let hook_err = Error::from(HookError::FaultInjected("loop:service:agg".into()));
        assert_eq!(close_code(Some(&hook_err)), "hook");
    }
}
