use crate::config::Api;
use crate::store::StoreHandle;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use log::{error, info};
use serde::Serialize;

#[derive(Serialize)]
pub struct ComponentStatus {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentStatus {
    fn up() -> Self {
        Self {
            status: "up".to_string(),
            error: None,
        }
    }

    fn down(e: impl ToString) -> Self {
        Self {
            status: "down".to_string(),
            error: Some(e.to_string()),
        }
    }
}

#[derive(Serialize)]
pub struct Components {
    store: ComponentStatus,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    components: Components,
}

async fn health_check(State(store): State<StoreHandle>) -> Json<HealthResponse> {
    let store_status = match store.ping().await {
        Ok(_) => ComponentStatus::up(),
        Err(e) => ComponentStatus::down(e),
    };
    let global_status = if store_status.status == "up" {
        "up"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status: global_status.to_string(),
        components: Components {
            store: store_status,
        },
    })
}

pub fn router(store: StoreHandle) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .with_state(store)
}

/// Starts the health listener in a detached task. A bind failure is logged,
/// not fatal: the listener is a readiness signal and must never block unit
/// startup.
pub fn start_health_api(api: &Api, store: StoreHandle) {
    let port = api.port;
    tokio::spawn(async move {
        let app = router(store);
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                info!("health listener bound on {addr}");
                listener
            }
            Err(e) => {
                error!("health listener failed to bind {addr}: {e}");
                return;
            }
        };
        if let Err(e) = axum::serve(listener, app.into_make_service()).await {
            error!("health listener error: {e}");
        }
    });
}
