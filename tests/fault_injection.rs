//! Drives the runtime's finishing path with injected lifecycle faults.
//! No store is required: liveness and close bookkeeping degrade gracefully
//! for a detached registry.

use async_trait::async_trait;
use lattice::config::StoreConfig;
use lattice::prelude::*;
use lattice::runtime::fault;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct FlaggedUnit {
    name: &'static str,
    ticking: bool,
    finishes: Arc<AtomicU64>,
}

impl FlaggedUnit {
    fn new(name: &'static str, ticking: bool) -> Self {
        Self {
            name,
            ticking,
            finishes: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl UnitModule for FlaggedUnit {
    fn spec(&self) -> UnitSpec {
        UnitSpec {
            name: self.name,
            ..UnitSpec::default()
        }
    }

    fn defaults(&self) -> UnitOverrides {
        UnitOverrides::default().with_loop_delay("1")
    }

    async fn setup(&self, _ctx: Arc<UnitContext>) -> Result<Hooks> {
        let mut hooks = Hooks::new();
        let finishes = self.finishes.clone();
        hooks.finish = Some(Box::new(move |_err| {
            let finishes = finishes.clone();
            Box::pin(async move {
                finishes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }));
        if self.ticking {
            hooks.tick = Some(Box::new(|| Box::pin(async { Ok(()) })));
        }
        Ok(hooks)
    }
}

fn orchestrator() -> Orchestrator {
    let pool = create_redis_pool(&StoreConfig::default()).expect("pool config");
    let store = StoreHandle::new(pool, "lattice-fault-test");
    let registry = Arc::new(InstanceRegistry::detached(store.clone()));
    Orchestrator::new(Arc::new(Config::default()), registry, store.clone(), store)
}

/// Both markers share one test: the marker variable is process-global, so
/// the two launches must not race each other.
#[tokio::test]
async fn test_fault_markers_drive_finishing() {
    // start:service marker fails the unit before its hooks run; every other
    // unit still gets its finish call.
    std::env::set_var(fault::FAULT_ENV, "start:service:faulty");
    {
        let faulty = FlaggedUnit::new("faulty", false);
        let steady = FlaggedUnit::new("steady", true);
        let faulty_finishes = faulty.finishes.clone();
        let steady_finishes = steady.finishes.clone();

        let err = orchestrator()
            .launch(vec![
                (UnitOverrides::default(), Arc::new(steady)),
                (UnitOverrides::default(), Arc::new(faulty)),
            ])
            .await
            .unwrap_err();
        assert!(err.is_hook(), "got {err:?}");
        assert_eq!(err.code(), "hook");
        assert_eq!(faulty_finishes.load(Ordering::SeqCst), 1);
        assert_eq!(steady_finishes.load(Ordering::SeqCst), 1);
    }

    // loop:service marker fails the first looping iteration.
    std::env::set_var(fault::FAULT_ENV, "loop:service:looper");
    {
        let looper = FlaggedUnit::new("looper", true);
        let finishes = looper.finishes.clone();

        let err = orchestrator()
            .launch(vec![(UnitOverrides::default(), Arc::new(looper))])
            .await
            .unwrap_err();
        assert!(err.is_hook(), "got {err:?}");
        assert_eq!(finishes.load(Ordering::SeqCst), 1);
    }

    std::env::remove_var(fault::FAULT_ENV);
}
