use crate::config::UnitOverrides;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

use super::instance::UnitContext;

/// External stream a unit consumes from.
#[derive(Debug, Clone)]
pub struct StreamBinding {
    pub key: String,
}

/// What a peer alias points at: a unit in the same launch, or an external
/// stub (documentation-only, never wired).
#[derive(Debug, Clone)]
pub enum PeerTarget {
    Unit(&'static str),
    Stub(&'static str),
}

#[derive(Debug, Clone)]
pub struct PeerRef {
    pub alias: &'static str,
    pub target: PeerTarget,
}

impl PeerRef {
    pub fn unit(alias: &'static str, service_key: &'static str) -> Self {
        Self {
            alias,
            target: PeerTarget::Unit(service_key),
        }
    }

    pub fn stub(alias: &'static str, url: &'static str) -> Self {
        Self {
            alias,
            target: PeerTarget::Stub(url),
        }
    }
}

/// Declared capability surface of a unit, documentation for peers.
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    pub name: &'static str,
    pub returns: &'static str,
}

/// Immutable declaration a unit module makes about itself.
#[derive(Debug, Clone, Default)]
pub struct UnitSpec {
    pub name: &'static str,
    pub peers: Vec<PeerRef>,
    pub endpoints: Vec<EndpointSpec>,
    pub input_stream: Option<StreamBinding>,
}

impl UnitSpec {
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }
}

pub type HookFuture = BoxFuture<'static, Result<()>>;
pub type Hook = Box<dyn Fn() -> HookFuture + Send + Sync>;
pub type FinishHook = Box<dyn Fn(Option<Arc<Error>>) -> HookFuture + Send + Sync>;
pub type ErrorHook = Box<dyn Fn(Arc<Error>) -> HookFuture + Send + Sync>;
pub type EndpointFn = Box<dyn Fn() -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;

/// The hook set a unit's setup returns: a fixed set of named slots, each
/// either present-with-behavior or absent. The runner branches on presence
/// only. Endpoints are the unit's callable surface for wired peers.
#[derive(Default)]
pub struct Hooks {
    pub test_setup: Option<Hook>,
    pub start: Option<Hook>,
    pub tick: Option<Hook>,
    pub input_stream: Option<Hook>,
    pub finish: Option<FinishHook>,
    pub on_error: Option<ErrorHook>,
    pub endpoints: HashMap<&'static str, EndpointFn>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("present", &self.present())
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the present hooks, for the post-setup log line.
    pub fn present(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.test_setup.is_some() {
            names.push("test_setup");
        }
        if self.start.is_some() {
            names.push("start");
        }
        if self.tick.is_some() {
            names.push("tick");
        }
        if self.input_stream.is_some() {
            names.push("input_stream");
        }
        if self.finish.is_some() {
            names.push("finish");
        }
        if self.on_error.is_some() {
            names.push("on_error");
        }
        names
    }

    pub fn has_loop_work(&self) -> bool {
        self.tick.is_some() || self.input_stream.is_some()
    }

    pub async fn call_endpoint(&self, name: &str) -> Result<serde_json::Value> {
        match self.endpoints.get(name) {
            Some(endpoint) => endpoint().await,
            None => Err(Error::runtime(format!("no such endpoint: {name}"))),
        }
    }
}

/// The contract a unit module fulfills: a spec, config defaults, and a setup
/// operation producing the hook set the orchestrator drives.
#[async_trait]
pub trait UnitModule: Send + Sync {
    fn spec(&self) -> UnitSpec;

    fn defaults(&self) -> UnitOverrides {
        UnitOverrides::default()
    }

    async fn setup(&self, ctx: Arc<UnitContext>) -> Result<Hooks>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hooks_present_names() {
        let mut hooks = Hooks::new();
        assert!(hooks.present().is_empty());
        assert!(!hooks.has_loop_work());

        hooks.start = Some(Box::new(|| Box::pin(async { Ok(()) })));
        hooks.tick = Some(Box::new(|| Box::pin(async { Ok(()) })));
        assert_eq!(hooks.present(), vec!["start", "tick"]);
        assert!(hooks.has_loop_work());
    }

    #[tokio::test]
    async fn test_call_endpoint() {
        let mut hooks = Hooks::new();
        hooks.endpoints.insert(
            "answer",
            Box::new(|| Box::pin(async { Ok(serde_json::json!(42)) })),
        );

        let value = hooks.call_endpoint("answer").await.unwrap();
        assert_eq!(value, serde_json::json!(42));
        assert!(hooks.call_endpoint("missing").await.is_err());
    }
}
