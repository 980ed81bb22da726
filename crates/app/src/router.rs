use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    middleware,
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::catch_panic::CatchPanicLayer;

use customer_registry_storage::Database;
use customer_registry_util::SecurityConfig;

use crate::service::CustomerService;
use crate::{auth, customers, problem, telemetry};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    customers: CustomerService,
    security: Arc<SecurityConfig>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, storage: &Database, security: SecurityConfig) -> Self {
        Self {
            metrics,
            customers: CustomerService::new(storage),
            security: Arc::new(security),
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn customers(&self) -> &CustomerService {
        &self.customers
    }

    pub fn security(&self) -> &SecurityConfig {
        &self.security
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

pub fn app_router(state: AppState) -> Router {
    with_middleware(routes(), state)
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route(
            "/api/customers",
            get(customers::list).post(customers::create),
        )
        .route(
            "/api/customers/:id",
            get(customers::fetch)
                .put(customers::update)
                .delete(customers::delete),
        )
        .method_not_allowed_fallback(problem::method_not_allowed)
        .fallback(problem::route_not_found)
}

/// Layers run outermost first: error rendering, panic capture, then auth.
fn with_middleware(routes: Router<AppState>, state: AppState) -> Router {
    routes
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_basic_auth,
        ))
        .layer(CatchPanicLayer::custom(problem::panic_response))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            problem::render_unhandled,
        ))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
