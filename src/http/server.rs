//! Service orchestration.
//!
//! # Responsibilities
//! - Own identity, plugins, status provider, metrics registry and logger
//! - Compose the router once: status routes, plugins, middleware
//! - Bind the listener and serve until SIGINT, SIGTERM or `stop`
//! - Drain in-flight requests within a bounded budget
//!
//! # Data Flow
//! ```text
//! Service::new(options)
//!     → logger dispatch, isolated registry, registrar, request metrics
//! register(plugin)*
//! start(port) / run(listener)
//!     → compose router (at most once)
//!     → spawn registry upkeep
//!     → accept loop: one hyper connection task per socket, in a JoinSet
//!     → termination (signals + stop channel) → close listener
//!     → cancel: connections finish their current request, then close
//!     → drain (timeout) → abort remaining connections → Stopped
//! ```
//!
//! # Design Decisions
//! - `start` and `run` take `self`, so nothing can be registered once
//!   serving has begun
//! - Connections live in a `JoinSet` owned by the serve loop. A drain that
//!   exceeds the budget aborts every one of them, so no handler can answer
//!   after `run` returns. The timeout is logged, not returned as an error

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::Request,
    middleware::{from_fn, from_fn_with_state},
    response::Response,
    routing::get,
    Router,
};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tower::ServiceExt;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::instrument::WithSubscriber;
use tracing::Dispatch;

use crate::config::ServiceConfig;
use crate::http::middleware::{
    access_log, normalize_method_not_allowed, recover_panics, scoped_logger, track_requests,
    AccessLog, RequestMetrics,
};
use crate::http::plugin::Plugin;
use crate::http::response;
use crate::http::status::{self, DefaultStatus, StatusProvider};
use crate::lifecycle::{wait_for_termination, ServiceState, Shutdown, StopHandle};
use crate::observability::logging;
use crate::observability::{
    initialize_metrics, LogFormat, LoggingError, MetricsError, MetricsRegistrar, MetricsRegistry,
    UPKEEP_INTERVAL,
};

/// Port used when none is configured.
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Prefix of the reserved operational routes.
pub const STATUS_PREFIX: &str = "/-";

/// Budget for draining in-flight requests on shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after a failed accept, so a full descriptor table does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Error type for service construction and serving.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("logger configuration failed: {0}")]
    Logging(#[from] LoggingError),
    #[error("metrics configuration failed: {0}")]
    Metrics(#[from] MetricsError),
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] io::Error),
    #[error("shutdown failed: {0}")]
    Shutdown(String),
}

/// Construction options of a [`Service`].
#[derive(Clone)]
pub struct ServiceOptions {
    pub name: String,
    pub version: String,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Overrides [`DefaultStatus`] when set.
    pub status: Option<Arc<dyn StatusProvider>>,
    /// Service specific metrics, registered at construction.
    pub metrics: Option<Arc<dyn MetricsRegistrar>>,
    /// Process and runtime collectors.
    pub default_collectors: bool,
    pub shutdown_timeout: Duration,
    /// Logger to use instead of one built from `log_level` and `log_format`.
    pub dispatch: Option<Dispatch>,
}

impl ServiceOptions {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            status: None,
            metrics: None,
            default_collectors: true,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
            dispatch: None,
        }
    }

    /// Options matching a loaded configuration file.
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.name.clone(), config.version.clone())
            .with_log_level(config.log_level.clone())
            .with_log_format(config.log_format)
            .with_default_collectors(config.metrics.default_collectors)
            .with_shutdown_timeout(Duration::from_secs(config.shutdown_timeout_secs))
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    pub fn with_status<P: StatusProvider + 'static>(mut self, provider: P) -> Self {
        self.status = Some(Arc::new(provider));
        self
    }

    pub fn with_metrics<R: MetricsRegistrar + 'static>(mut self, registrar: R) -> Self {
        self.metrics = Some(Arc::new(registrar));
        self
    }

    pub fn with_default_collectors(mut self, enabled: bool) -> Self {
        self.default_collectors = enabled;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Log through `dispatch`. `log_level` and `log_format` are then unused.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }
}

impl fmt::Debug for ServiceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceOptions")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("custom_status", &self.status.is_some())
            .field("custom_metrics", &self.metrics.is_some())
            .field("default_collectors", &self.default_collectors)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("custom_dispatch", &self.dispatch.is_some())
            .finish()
    }
}

/// An HTTP microservice: plugins plus the operational surface around them.
pub struct Service {
    name: String,
    version: String,
    plugins: Vec<Plugin>,
    status: Arc<dyn StatusProvider>,
    registry: MetricsRegistry,
    request_metrics: Arc<RequestMetrics>,
    dispatch: Dispatch,
    shutdown_timeout: Duration,
    router: Option<Router>,
    shutdown: Shutdown,
}

impl Service {
    /// Create a service with its own logger and metrics registry.
    pub fn new(options: ServiceOptions) -> Result<Self, ServiceError> {
        let dispatch = match options.dispatch {
            Some(dispatch) => dispatch,
            None => logging::init(&options.log_level, options.log_format)?,
        };
        let (registry, factory) = initialize_metrics(options.default_collectors)?;

        if let Some(registrar) = &options.metrics {
            registrar.register(&factory);
        }
        let request_metrics = Arc::new(RequestMetrics::register(&factory)?);

        let status = options
            .status
            .unwrap_or_else(|| Arc::new(DefaultStatus) as Arc<dyn StatusProvider>);

        Ok(Self {
            name: options.name,
            version: options.version,
            plugins: Vec::new(),
            status,
            registry,
            request_metrics,
            dispatch,
            shutdown_timeout: options.shutdown_timeout,
            router: None,
            shutdown: Shutdown::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Plugins in mount order.
    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    /// Add a plugin. Ignored, with a warning, once the router is composed.
    pub fn register(&mut self, plugin: Plugin) -> &mut Self {
        if self.router.is_some() {
            tracing::dispatcher::with_default(&self.dispatch, || {
                tracing::warn!(
                    path = %plugin.path(),
                    "Router already composed, plugin will not be mounted"
                );
            });
            return self;
        }
        self.plugins.push(plugin);
        self
    }

    /// Request a graceful shutdown. Never blocks.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    /// Handle for stopping the service once `start` has taken it.
    pub fn stop_handle(&self) -> StopHandle {
        self.shutdown.handle()
    }

    pub fn state(&self) -> ServiceState {
        self.shutdown.state()
    }

    /// Logger owned by this service.
    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    /// Dispatch one request through the full stack without a listener.
    pub async fn inject(&mut self, request: Request<Body>) -> Response {
        let router = self.compose();
        match router.oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }

    /// Bind `0.0.0.0:port` and serve until shutdown completes.
    pub async fn start(self, port: u16) -> Result<(), ServiceError> {
        let address = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = match TcpListener::bind(address).await {
            Ok(listener) => listener,
            Err(source) => {
                tracing::dispatcher::with_default(&self.dispatch, || {
                    tracing::error!(address = %address, error = %source, "Failed to bind listener");
                });
                return Err(ServiceError::Bind { address, source });
            }
        };
        self.run(listener).await
    }

    /// Serve on an already bound listener until shutdown completes.
    pub async fn run(self, listener: TcpListener) -> Result<(), ServiceError> {
        let dispatch = self.dispatch.clone();
        self.serve(listener).with_subscriber(dispatch).await
    }

    async fn serve(mut self, listener: TcpListener) -> Result<(), ServiceError> {
        let app = self.compose();
        let address = listener.local_addr().map_err(ServiceError::Serve)?;
        let Some(mut stop_requests) = self.shutdown.take_receiver() else {
            return Err(ServiceError::Shutdown(
                "termination channel already in use".to_string(),
            ));
        };

        let upkeep = spawn_upkeep(self.registry.clone(), self.dispatch.clone());
        let (cancel, _) = watch::channel(false);
        let mut connections = JoinSet::new();

        self.shutdown.set_state(ServiceState::Running);
        tracing::info!(
            address = %address,
            service = %self.name,
            version = %self.version,
            "Service listening"
        );

        let termination = wait_for_termination(&mut stop_requests);
        tokio::pin!(termination);

        loop {
            tokio::select! {
                reason = &mut termination => {
                    tracing::info!(reason = %reason, "Shutdown signal received");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(
                            serve_connection(stream, peer, app.clone(), cancel.subscribe())
                                .with_subscriber(self.dispatch.clone()),
                        );
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = connections.join_next() => reap(joined),
            }
        }

        // Stop accepting before draining.
        drop(listener);
        self.shutdown.set_state(ServiceState::ShuttingDown);
        let _ = cancel.send(true);
        tracing::info!(
            timeout = ?self.shutdown_timeout,
            connections = connections.len(),
            "Draining in-flight requests"
        );

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while let Some(joined) = connections.join_next().await {
                reap(joined);
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::info!("Service stopped"),
            Err(_) => {
                tracing::error!(
                    connections = connections.len(),
                    "graceful shutdown timed out, forcing exit"
                );
                connections.abort_all();
                while connections.join_next().await.is_some() {}
            }
        }

        upkeep.abort();
        self.shutdown.set_state(ServiceState::Stopped);
        Ok(())
    }

    /// Compose the router on first use and reuse it afterwards.
    fn compose(&mut self) -> Router {
        if let Some(router) = &self.router {
            return router.clone();
        }
        let router = tracing::dispatcher::with_default(&self.dispatch, || self.build_router());
        self.router = Some(router.clone());
        router
    }

    fn build_router(&self) -> Router {
        let status = Router::new()
            .route("/healthz", self.status.health(&self.name, &self.version))
            .route("/ready", self.status.ready(&self.name, &self.version))
            .route("/check-up", self.status.check_up(&self.name, &self.version))
            .route("/metrics", get(status::metrics).with_state(self.registry.clone()));

        let plugins = self
            .plugins
            .iter()
            .fold(Router::new(), |router, plugin| {
                tracing::debug!(
                    path = %plugin.path(),
                    routes = plugin.routes().len(),
                    "Mounting plugin"
                );
                plugin.mount(router)
            })
            .layer(from_fn_with_state(
                AccessLog::excluding([format!("{STATUS_PREFIX}/")]),
                access_log,
            ));

        Router::new()
            .nest(STATUS_PREFIX, status)
            .merge(plugins)
            .fallback(response::route_not_found)
            .layer(from_fn(normalize_method_not_allowed))
            .layer(from_fn_with_state(
                self.request_metrics.clone(),
                track_requests,
            ))
            .layer(from_fn(recover_panics))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(from_fn_with_state(self.dispatch.clone(), scoped_logger))
    }
}

/// Serve one connection until it closes, switching to a graceful close
/// once `cancelled` flips.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: Router,
    mut cancelled: watch::Receiver<bool>,
) {
    let builder = auto::Builder::new(TokioExecutor::new());
    let connection =
        builder.serve_connection_with_upgrades(TokioIo::new(stream), TowerToHyperService::new(app));
    tokio::pin!(connection);

    let mut draining = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(peer = %peer, error = %e, "Connection closed with error");
                }
                break;
            }
            _ = cancelled.changed(), if !draining => {
                draining = true;
                connection.as_mut().graceful_shutdown();
            }
        }
    }
}

fn reap(joined: Result<(), JoinError>) {
    match joined {
        Ok(()) => {}
        Err(e) if e.is_panic() => tracing::warn!("Connection aborted by handler"),
        Err(e) => tracing::debug!(error = %e, "Connection task cancelled"),
    }
}

/// Periodically fold pending histogram samples so an unscraped registry
/// stays bounded.
fn spawn_upkeep(registry: MetricsRegistry, dispatch: Dispatch) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut ticks = tokio::time::interval(UPKEEP_INTERVAL);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                registry.run_upkeep();
            }
        }
        .with_subscriber(dispatch),
    )
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("plugins", &self.plugins)
            .field("composed", &self.router.is_some())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MetricsFactory;
    use axum::http::StatusCode;

    fn options() -> ServiceOptions {
        ServiceOptions::new("test-service", "v0.0.1")
            .with_log_level("error")
            .with_default_collectors(false)
    }

    #[test]
    fn test_invalid_log_level_is_rejected() {
        let result = Service::new(options().with_log_level("loud"));
        assert!(matches!(
            result,
            Err(ServiceError::Logging(LoggingError::InvalidLevel(level))) if level == "loud"
        ));
    }

    #[test]
    fn test_new_service_is_idle_and_empty() {
        let service = Service::new(options()).unwrap();
        assert_eq!(service.name(), "test-service");
        assert_eq!(service.version(), "v0.0.1");
        assert!(service.plugins().is_empty());
        assert_eq!(service.state(), ServiceState::Idle);
        assert!(service
            .registry()
            .contains(crate::observability::metrics::REQUEST_DURATION_HISTOGRAM));
    }

    #[test]
    fn test_registrar_runs_against_service_registry() {
        struct Jobs;
        impl MetricsRegistrar for Jobs {
            fn register(&self, factory: &MetricsFactory) {
                factory.counter("jobs_total", "jobs processed");
            }
        }

        let service = Service::new(options().with_metrics(Jobs)).unwrap();
        assert!(service.registry().contains("jobs_total"));
    }

    #[test]
    fn test_registrar_clashing_with_request_metrics_fails() {
        struct Clash;
        impl MetricsRegistrar for Clash {
            fn register(&self, factory: &MetricsFactory) {
                let _ = factory.try_histogram("http_request_summary_seconds", "clash");
            }
        }

        assert!(matches!(
            Service::new(options().with_metrics(Clash)),
            Err(ServiceError::Metrics(MetricsError::AlreadyRegistered(_)))
        ));
    }

    #[tokio::test]
    async fn test_register_after_compose_is_ignored() {
        let mut service = Service::new(options()).unwrap();
        let response = service
            .inject(Request::get("/-/healthz").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let mut plugin = Plugin::new("/");
        plugin.add_route("GET", "/late", || async { "late" });
        service.register(plugin);
        assert!(service.plugins().is_empty());

        let response = service
            .inject(Request::get("/late").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_supplied_dispatch_skips_level_parsing() {
        let dispatch = logging::init("off", LogFormat::Pretty).unwrap();
        let service = Service::new(options().with_log_level("loud").with_dispatch(dispatch));
        assert!(service.is_ok());
    }

    #[test]
    fn test_options_from_config() {
        let config = ServiceConfig {
            name: "orders".to_string(),
            log_format: LogFormat::Json,
            shutdown_timeout_secs: 5,
            ..ServiceConfig::default()
        };
        let options = ServiceOptions::from_config(&config);
        assert_eq!(options.name, "orders");
        assert_eq!(options.log_format, LogFormat::Json);
        assert_eq!(options.shutdown_timeout, Duration::from_secs(5));
        assert!(options.default_collectors);
    }
}
