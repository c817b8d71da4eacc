use lattice::monitor::LoggerConfig;
use lattice::prelude::*;
use lattice::runtime::health;
use log::{error, info};
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config_path =
        std::env::var("LATTICE_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("failed to load {config_path}: {err}");
            std::process::exit(1);
        }
    };

    let logger_init = match &config.logger {
        Some(section) => LoggerConfig::from_section(section, &config.name).init(),
        None => init_app_logger(&config.name).map(|_| ()),
    };
    if let Err(err) = logger_init {
        eprintln!("logger initialization failed: {err}");
    }
    info!("config loaded: {config:?}");

    let Some(pool) = create_redis_pool(&config.store) else {
        error!("invalid store configuration");
        std::process::exit(1);
    };
    let Some(blocking_pool) = create_redis_pool(&config.store) else {
        error!("invalid store configuration");
        std::process::exit(1);
    };
    let store = StoreHandle::new(pool, config.name.clone());
    let blocking_store = StoreHandle::new(blocking_pool, config.name.clone());

    let registry = match InstanceRegistry::register(store.clone()).await {
        Ok(registry) => Arc::new(registry),
        Err(err) => {
            error!("instance registration failed: {err}");
            std::process::exit(1);
        }
    };
    info!(
        "ready: instance_id={} restart_count={}",
        registry.instance_id(),
        registry.restart_count()
    );

    if let Some(api) = &config.api {
        health::start_health_api(api, store.clone());
    }

    let orchestrator = Orchestrator::new(config.clone(), registry, store, blocking_store);
    let units: Vec<UnitTuple> = vec![
        (UnitOverrides::default(), Arc::new(MonitorAggregator)),
        (UnitOverrides::default(), Arc::new(HelloWorld)),
        (
            UnitOverrides::default()
                .with_loop_delay("500")
                .with_params(json!({ "audience_label": "wide world" })),
            Arc::new(HelloWideWorld),
        ),
    ];

    if let Err(err) = orchestrator.launch(units).await {
        error!("fatal: {err}");
        std::process::exit(1);
    }
}
