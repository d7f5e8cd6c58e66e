//! Shared utilities for integration tests.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::Path;
use axum::http::{Method, Request};
use axum::response::Response;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::level_filters::LevelFilter;
use tracing::Dispatch;

use microbase::observability::logging::build_dispatch_to;
use microbase::{
    json, AbortHandler, LogFormat, Plugin, Service, ServiceError, ServiceOptions, StopHandle,
};

pub const NAME: &str = "test-service";
pub const VERSION: &str = "v0.0.1";

/// Options for a quiet service without the process collectors.
pub fn options() -> ServiceOptions {
    ServiceOptions::new(NAME, VERSION)
        .with_log_level("error")
        .with_default_collectors(false)
}

/// In-memory log sink shared between a dispatch and the test.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

#[allow(dead_code)]
impl CapturedLogs {
    /// JSON dispatch at INFO writing into this sink.
    pub fn dispatch(&self) -> Dispatch {
        let sink = self.clone();
        build_dispatch_to(LevelFilter::INFO, LogFormat::Json, move || sink.clone())
    }

    pub fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Lines carrying `message`.
    pub fn matching(&self, message: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.contains(message))
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Service with the greeting plugin mounted at the root.
#[allow(dead_code)]
pub fn greeting_service() -> Service {
    let mut service = Service::new(options()).unwrap();
    service.register(greeting_plugin("/"));
    service
}

/// Plugin with a few well-behaved and a few misbehaving routes.
pub fn greeting_plugin(prefix: &str) -> Plugin {
    let mut plugin = Plugin::new(prefix);
    plugin
        .add_route("GET", "/greet", || async {
            json(&serde_json::json!({ "message": "Hello, World!" }))
        })
        .add_route("GET", "/greet/{who}", |Path(who): Path<String>| async move {
            format!("Hello, {who}!")
        })
        .add_route("GET", "/panic", panicking)
        .add_route("GET", "/abort", aborting);
    plugin
}

async fn panicking() -> &'static str {
    panic!("it should not die")
}

async fn aborting() -> &'static str {
    AbortHandler::abort()
}

/// Plugin whose `/slow` handler signals `entered`, then sleeps for `delay`.
#[allow(dead_code)]
pub fn slow_plugin(entered: Arc<Notify>, delay: Duration) -> Plugin {
    let mut plugin = Plugin::new("/");
    plugin.add_route("GET", "/slow", move || {
        let entered = entered.clone();
        async move {
            entered.notify_one();
            tokio::time::sleep(delay).await;
            "finally"
        }
    });
    plugin
}

/// A service running on an ephemeral local port.
#[allow(dead_code)]
pub struct Running {
    pub address: SocketAddr,
    pub handle: StopHandle,
    pub task: JoinHandle<Result<(), ServiceError>>,
}

#[allow(dead_code)]
impl Running {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }

    /// Stop the service and wait for `run` to return.
    pub async fn shutdown(self) -> Result<(), ServiceError> {
        self.handle.stop();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("service did not stop in time")
            .expect("service task panicked")
    }
}

#[allow(dead_code)]
pub async fn spawn(service: Service) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let handle = service.stop_handle();
    let task = tokio::spawn(service.run(listener));
    Running {
        address,
        handle,
        task,
    }
}

#[allow(dead_code)]
pub fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[allow(dead_code)]
pub fn get(uri: &str) -> Request<Body> {
    request(Method::GET, uri)
}

#[allow(dead_code)]
pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[allow(dead_code)]
pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

/// Value of the first sample line of `metric` carrying every label fragment.
#[allow(dead_code)]
pub fn sample(rendered: &str, metric: &str, labels: &[&str]) -> Option<f64> {
    rendered
        .lines()
        .filter(|line| line.starts_with(&format!("{metric}{{")))
        .find(|line| labels.iter().all(|label| line.contains(label)))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}
