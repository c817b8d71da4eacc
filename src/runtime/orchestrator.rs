use crate::config::{parse_delay_strict, Config, UnitConfig, UnitOverrides};
use crate::errors::{ConfigError, Error, Result, WiringError};
use crate::monitor::{Monitor, StreamSink};
use crate::registry::InstanceRegistry;
use crate::store::StoreHandle;
use log::warn;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use super::fault;
use super::instance::{ShutdownHandle, UnitContext, UnitInstance};
use super::unit::{PeerTarget, UnitModule};

/// One launch entry: a per-launch override plus the unit module itself.
pub type UnitTuple = (UnitOverrides, Arc<dyn UnitModule>);

/// Constructs, wires, and drives unit instances. Construction order is the
/// launch-list order and is load-bearing: a peer may only reference a unit
/// constructed before it.
pub struct Orchestrator {
    config: Arc<Config>,
    registry: Arc<InstanceRegistry>,
    store: StoreHandle,
    blocking_store: StoreHandle,
    monitor: Monitor,
    shutdown: ShutdownHandle,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<InstanceRegistry>,
        store: StoreHandle,
        blocking_store: StoreHandle,
    ) -> Self {
        let sink = StreamSink::new(
            store.clone(),
            config.monitor.stream.clone(),
            config.monitor.max_len,
        );
        Self {
            config,
            registry,
            store,
            blocking_store,
            monitor: Monitor::new("core", Some(sink)),
            shutdown: ShutdownHandle::new(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Runs the full lifecycle: construct every unit in list order, wire
    /// peers, then drive all runners until the first fatal failure or a
    /// voluntary exit. The runtime is expected to run until killed; all
    /// runners resolving without an exit request is itself an error.
    pub async fn launch(&self, units: Vec<UnitTuple>) -> Result<()> {
        let instances = self.construct_all(units).await?;
        self.wire_all(&instances).await?;
        self.monitor.info_data(
            json!({ "serviceKeys": instances.iter().map(|i| i.service_key()).collect::<Vec<_>>() }),
            "units setup",
        );
        self.run_all(instances).await
    }

    async fn construct_all(&self, units: Vec<UnitTuple>) -> Result<Vec<Arc<UnitInstance>>> {
        let mut instances: Vec<Arc<UnitInstance>> = Vec::with_capacity(units.len());
        let mut by_name: HashMap<String, usize> = HashMap::new();

        for (order, (overrides, module)) in units.into_iter().enumerate() {
            let spec = module.spec();
            if spec.name.is_empty() {
                return Err(ConfigError::MissingUnitName.into());
            }
            if by_name.contains_key(spec.name) {
                return Err(ConfigError::DuplicateUnitName(spec.name.to_string()).into());
            }

            let service_key = spec.name.to_string();
            let config = UnitConfig::merge(self.config.clone(), &module.defaults(), &overrides);
            let loop_delay = Duration::from_millis(parse_delay_strict(&config.loop_delay)?);

            let sink = StreamSink::new(
                self.store.clone(),
                self.config.monitor.stream.clone(),
                self.config.monitor.max_len,
            );
            let ctx = Arc::new(UnitContext::new(
                service_key.clone(),
                config,
                self.registry.instance_id(),
                Monitor::new(service_key.clone(), Some(sink)),
                self.store.clone(),
                self.blocking_store.clone(),
                self.shutdown.clone(),
            ));

            // Bind peers constructed earlier so setup can already use them;
            // the wiring pass re-binds with the full assertions.
            {
                let mut peers = ctx.peers.write().await;
                for peer in &spec.peers {
                    if let PeerTarget::Unit(target) = &peer.target {
                        if let Some(&index) = by_name.get(*target) {
                            peers.insert(peer.alias.to_string(), instances[index].hooks.clone());
                        }
                    }
                }
            }

            let hooks = Arc::new(module.setup(ctx.clone()).await?);
            ctx.monitor.info_data(
                json!({ "serviceKey": service_key, "hooks": hooks.present() }),
                "setup",
            );

            by_name.insert(service_key, order);
            instances.push(Arc::new(UnitInstance {
                spec,
                ctx,
                hooks,
                loop_delay,
                counters: Default::default(),
                setup_at_ms: chrono::Utc::now().timestamp_millis(),
                order,
            }));
        }

        Ok(instances)
    }

    /// Second pass over the arena of constructed instances: every declared
    /// unit peer must name a unit constructed earlier in this launch.
    async fn wire_all(&self, instances: &[Arc<UnitInstance>]) -> Result<()> {
        let by_name: HashMap<&str, usize> = instances
            .iter()
            .map(|instance| (instance.spec.name, instance.order))
            .collect();

        for instance in instances {
            self.monitor
                .trace(&format!("wire:service:{}", instance.service_key()))?;
            let mut peers = instance.ctx.peers.write().await;
            for peer in &instance.spec.peers {
                let target = match &peer.target {
                    PeerTarget::Unit(target) => *target,
                    PeerTarget::Stub(_) => continue,
                };
                let target_order = *by_name.get(target).ok_or_else(|| {
                    Error::from(WiringError::UnknownPeer {
                        unit: instance.service_key().to_string(),
                        alias: peer.alias.to_string(),
                        target: target.to_string(),
                    })
                })?;
                if target_order >= instance.order {
                    return Err(WiringError::ForwardReference {
                        unit: instance.service_key().to_string(),
                        alias: peer.alias.to_string(),
                        target: target.to_string(),
                    }
                    .into());
                }
                peers.insert(
                    peer.alias.to_string(),
                    instances[target_order].hooks.clone(),
                );
            }
        }
        Ok(())
    }

    async fn run_all(&self, instances: Vec<Arc<UnitInstance>>) -> Result<()> {
        let mut runners = JoinSet::new();
        for instance in &instances {
            runners.spawn(run_unit(
                instance.clone(),
                self.registry.clone(),
                self.shutdown.clone(),
            ));
        }

        let mut failure: Option<Error> = None;
        while let Some(joined) = runners.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failure = Some(err);
                    break;
                }
                Err(join_err) => {
                    failure = Some(Error::runtime(format!("runner aborted: {join_err}")));
                    break;
                }
            }
        }

        // First failure stops the world: remaining runners are cancelled and
        // the shared finishing sequence runs exactly once.
        self.shutdown.halt();
        runners.abort_all();
        while runners.join_next().await.is_some() {}

        let outcome = failure.or_else(|| match self.shutdown.take_outcome() {
            Some(outcome) => outcome.error,
            None => Some(Error::runtime("runners resolved")),
        });

        match outcome {
            Some(error) => {
                let shared = Arc::new(error);
                self.finish_all(&instances, Some(shared.clone())).await;
                self.registry.close(Some(&shared)).await;
                Err(match Arc::try_unwrap(shared) {
                    Ok(error) => error,
                    Err(shared) => {
                        Error::with_message(
                            *shared.kind(),
                            shared.to_string(),
                            None::<crate::errors::BoxError>,
                        )
                    }
                })
            }
            None => {
                self.finish_all(&instances, None).await;
                self.registry.close(None).await;
                Ok(())
            }
        }
    }

    /// Best-effort fan-out: every present finish hook runs; a failing finish
    /// is logged and never masks the triggering error.
    async fn finish_all(&self, instances: &[Arc<UnitInstance>], error: Option<Arc<Error>>) {
        for instance in instances {
            if let Some(finish) = &instance.hooks.finish {
                self.monitor.info_data(
                    json!({ "serviceKey": instance.service_key() }),
                    "finish",
                );
                if let Err(err) = finish(error.clone()).await {
                    self.monitor.warn_data(
                        json!({ "serviceKey": instance.service_key(), "err": err.to_string() }),
                        "finish",
                    );
                }
            }
        }
    }
}

/// Per-unit runner state machine. States: constructed → started → looping →
/// closed; any hook error escalates to the orchestrator, which owns the
/// process-wide finishing transition.
async fn run_unit(
    instance: Arc<UnitInstance>,
    registry: Arc<InstanceRegistry>,
    shutdown: ShutdownHandle,
) -> Result<()> {
    let service_key = instance.service_key().to_string();
    fault::check(&fault::start_point(&service_key))?;

    if let Some(test_setup) = &instance.hooks.test_setup {
        test_setup().await?;
    }
    if let Some(start) = &instance.hooks.start {
        start().await?;
    }
    if !instance.hooks.has_loop_work() {
        return Ok(());
    }

    let loop_marker = fault::loop_point(&service_key);
    while !shutdown.is_closed() && registry.is_active().await {
        if let Some(tick) = &instance.hooks.tick {
            fault::check(&loop_marker)?;
            instance.counters.loops.fetch_add(1, Ordering::Relaxed);
            if let Err(err) = tick().await {
                route_loop_error(&instance, err).await?;
            }
        }
        if let Some(input_stream) = &instance.hooks.input_stream {
            if let Err(err) = input_stream().await {
                route_loop_error(&instance, err).await?;
            }
        }
        tokio::time::sleep(instance.loop_delay).await;
    }
    Ok(())
}

/// A failed tick/input_stream is fatal unless the unit installed an
/// `on_error` hook; the hook observing the error keeps the loop alive.
async fn route_loop_error(instance: &UnitInstance, err: Error) -> Result<()> {
    match &instance.hooks.on_error {
        Some(on_error) => {
            warn!(
                "[{}] loop hook error routed to on_error: {err}",
                instance.service_key()
            );
            on_error(Arc::new(err)).await
        }
        None => Err(err),
    }
}
