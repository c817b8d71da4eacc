use crate::config::UnitOverrides;
use crate::errors::Result;
use crate::runtime::{EndpointSpec, Hooks, UnitContext, UnitModule, UnitSpec};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// A unit with no loop work: it greets at setup and exposes its audience
/// label as an endpoint for wired peers.
pub struct HelloWorld;

#[async_trait]
impl UnitModule for HelloWorld {
    fn spec(&self) -> UnitSpec {
        UnitSpec {
            name: "hello-world",
            endpoints: vec![EndpointSpec {
                name: "get_audience_label",
                returns: "string",
            }],
            ..UnitSpec::default()
        }
    }

    fn defaults(&self) -> UnitOverrides {
        UnitOverrides::default().with_params(json!({ "audience_label": "world" }))
    }

    async fn setup(&self, ctx: Arc<UnitContext>) -> Result<Hooks> {
        let label = ctx
            .config
            .param_str("audience_label")
            .unwrap_or("world")
            .to_string();
        if let Ok(time) = ctx.store.time().await {
            ctx.monitor.info_data(
                json!({ "storeTime": [time.0, time.1] }),
                &format!("hello {label}"),
            );
        }

        let mut hooks = Hooks::new();
        hooks.endpoints.insert(
            "get_audience_label",
            Box::new(move || {
                let label = label.clone();
                Box::pin(async move { Ok(json!(label)) })
            }),
        );
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

    fn ctx_with_override(overrides: UnitOverrides) -> Arc<UnitContext> {
        let pool = crate::store::create_redis_pool(&crate::config::StoreConfig::default())
            .expect("pool config");
        let store = StoreHandle::new(pool, "t");
        let config = UnitConfig::merge(
            Arc::new(Config::default()),
            &HelloWorld.defaults(),
            &overrides,
        );
        Arc::new(UnitContext::new(
            "hello-world".to_string(),
            config,
            0,
            Monitor::local("hello-world"),
            store.clone(),
            store,
            ShutdownHandle::new(),
        ))
    }

    #[tokio::test]
    async fn test_endpoint_returns_default_label() {
        let hooks = HelloWorld
            .setup(ctx_with_override(UnitOverrides::default()))
            .await
            .unwrap();
        let label = hooks.call_endpoint("get_audience_label").await.unwrap();
        assert_eq!(label, json!("world"));
        assert!(!hooks.has_loop_work());
    }

    #[tokio::test]
    async fn test_endpoint_honors_override() {
        let overrides =
            UnitOverrides::default().with_params(json!({ "audience_label": "wide world" }));
        let hooks = HelloWorld
            .setup(ctx_with_override(overrides))
            .await
            .unwrap();
        let label = hooks.call_endpoint("get_audience_label").await.unwrap();
        assert_eq!(label, json!("wide world"));
    }
}
