use crate::config::UnitConfig;
use crate::errors::Error;
use crate::monitor::Monitor;
use crate::store::StoreHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

use super::unit::{Hooks, UnitSpec};

/// Alias → peer hook set, populated at wiring time.
pub type PeerMap = Arc<RwLock<HashMap<String, Arc<Hooks>>>>;

/// Why the runtime is shutting down, recorded by the first `exit` call.
pub struct ExitOutcome {
    pub reason: String,
    pub error: Option<Error>,
}

/// Process-wide cooperative stop signal. Runners observe `is_closed` at
/// iteration boundaries; the first recorded outcome wins.
#[derive(Clone, Default)]
pub struct ShutdownHandle {
    closed: Arc<AtomicBool>,
    outcome: Arc<Mutex<Option<ExitOutcome>>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Flips the stop flag without recording an outcome. Used once runners
    /// are being torn down and no further outcome should be attributed.
    pub fn halt(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn close(&self, reason: impl Into<String>, error: Option<Error>) {
        let mut slot = self.outcome.lock().expect("shutdown outcome lock poisoned");
        if slot.is_none() {
            *slot = Some(ExitOutcome {
                reason: reason.into(),
                error,
            });
        }
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn take_outcome(&self) -> Option<ExitOutcome> {
        self.outcome
            .lock()
            .expect("shutdown outcome lock poisoned")
            .take()
    }
}

/// Everything a unit's setup gets to work with: its merged config, identity,
/// monitor, store handles, wired peers, and the voluntary-exit capability.
pub struct UnitContext {
    pub service_key: String,
    pub config: UnitConfig,
    pub instance_id: i64,
    pub monitor: Monitor,
    pub store: StoreHandle,
    /// Reserved for long-blocking reads so they never starve ordinary
    /// round-trips on the general handle.
    pub blocking_store: StoreHandle,
    pub peers: PeerMap,
    shutdown: ShutdownHandle,
}

impl UnitContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service_key: String,
        config: UnitConfig,
        instance_id: i64,
        monitor: Monitor,
        store: StoreHandle,
        blocking_store: StoreHandle,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            service_key,
            config,
            instance_id,
            monitor,
            store,
            blocking_store,
            peers: Arc::new(RwLock::new(HashMap::new())),
            shutdown,
        }
    }

    pub async fn peer(&self, alias: &str) -> Option<Arc<Hooks>> {
        self.peers.read().await.get(alias).cloned()
    }

    /// Voluntary fatal termination: records the outcome and flips the
    /// process-wide stop signal. The orchestrator runs the finishing
    /// sequence once all runners observe it.
    pub fn exit(&self, reason: &str, error: Option<Error>) {
        self.monitor.error(&format!("exit: {reason}"));
        self.shutdown.close(reason, error);
    }
}

/// Loop iteration counter, owned by the instance's own runner.
#[derive(Default)]
pub struct Counters {
    pub loops: AtomicU64,
}

impl Counters {
    pub fn loops(&self) -> u64 {
        self.loops.load(Ordering::Relaxed)
    }
}

/// A constructed unit: spec, context, hook set, and the strictly parsed
/// inter-iteration delay. Created once at startup, driven only by its own
/// runner.
pub struct UnitInstance {
    pub spec: UnitSpec,
    pub ctx: Arc<UnitContext>,
    pub hooks: Arc<Hooks>,
    pub loop_delay: Duration,
    pub counters: Counters,
    pub setup_at_ms: i64,
    /// Construction index in the launch list; wiring forbids references to
    /// higher indexes.
    pub order: usize,
}

impl UnitInstance {
    pub fn service_key(&self) -> &str {
        &self.ctx.service_key
    }
}

impl std::fmt::Debug for UnitInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitInstance")
            .field("service_key", &self.ctx.service_key)
            .field("loop_delay", &self.loop_delay)
            .field("setup_at_ms", &self.setup_at_ms)
            .field("order", &self.order)
            .finish()
    }
}
