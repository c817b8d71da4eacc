use crate::config::UnitOverrides;
use crate::errors::{Error, Result};
use crate::runtime::{Hooks, PeerRef, UnitContext, UnitModule, UnitSpec};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// A looping unit that consumes a peer's endpoint. Declares one wired peer
/// (`hello-world`, which must be launched before it) and one external stub.
pub struct HelloWideWorld;

#[async_trait]
impl UnitModule for HelloWideWorld {
    fn spec(&self) -> UnitSpec {
        UnitSpec {
            name: "hello-wide-world",
            peers: vec![
                PeerRef::stub("announcer", "github.com/example/lattice-announcer"),
                PeerRef::unit("hello_world", "hello-world"),
            ],
            ..UnitSpec::default()
        }
    }

    fn defaults(&self) -> UnitOverrides {
        UnitOverrides::default().with_params(json!({ "audience_label": "wide world" }))
    }

    async fn setup(&self, ctx: Arc<UnitContext>) -> Result<Hooks> {
        let label = ctx
            .config
            .param_str("audience_label")
            .unwrap_or("wide world")
            .to_string();

        let peer = ctx
            .peer("hello_world")
            .await
            .ok_or_else(|| Error::runtime("peer 'hello_world' not wired"))?;
        let peer_label = peer.call_endpoint("get_audience_label").await?;
        ctx.monitor.info_data(
            json!({ "helloWorldAudience": peer_label }),
            &format!("hello {label}"),
        );

        let mut hooks = Hooks::new();
        let monitor = ctx.monitor.clone();
        hooks.tick = Some(Box::new(move || {
            let monitor = monitor.clone();
            let label = label.clone();
            Box::pin(async move {
                monitor.info(&format!("loop, {label}"));
                Ok(())
            })
        }));
        Ok(hooks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, UnitConfig, UnitOverrides};
    use crate::monitor::Monitor;
    use crate::runtime::ShutdownHandle;
    use crate::store::StoreHandle;
    use crate::units::HelloWorld;

    fn ctx() -> Arc<UnitContext> {
        let pool = crate::store::create_redis_pool(&crate::config::StoreConfig::default())
            .expect("pool config");
        let store = StoreHandle::new(pool, "t");
        let config = UnitConfig::merge(
            Arc::new(Config::default()),
            &HelloWideWorld.defaults(),
            &UnitOverrides::default(),
        );
        Arc::new(UnitContext::new(
            "hello-wide-world".to_string(),
            config,
            0,
            Monitor::local("hello-wide-world"),
            store.clone(),
            store,
            ShutdownHandle::new(),
        ))
    }

    #[tokio::test]
    async fn test_setup_fails_without_wired_peer() {
        let err = HelloWideWorld.setup(ctx()).await.unwrap_err();
        assert!(err.to_string().contains("not wired"));
    }

    #[tokio::test]
    async fn test_setup_uses_peer_endpoint() {
        let ctx = ctx();
        let peer_ctx = {
            let pool = crate::store::create_redis_pool(&crate::config::StoreConfig::default())
                .expect("pool config");
            let store = StoreHandle::new(pool, "t");
            Arc::new(UnitContext::new(
                "hello-world".to_string(),
                UnitConfig::merge(
                    Arc::new(Config::default()),
                    &HelloWorld.defaults(),
                    &UnitOverrides::default(),
                ),
                0,
                Monitor::local("hello-world"),
                store.clone(),
                store,
                ShutdownHandle::new(),
            ))
        };
        let peer_hooks = Arc::new(HelloWorld.setup(peer_ctx).await.unwrap());
        ctx.peers
            .write()
            .await
            .insert("hello_world".to_string(), peer_hooks);

        let hooks = HelloWideWorld.setup(ctx).await.unwrap();
        assert!(hooks.has_loop_work());
    }
}
