//! Process signal handling.
//!
//! Signals reach every service in the process, so these tests live in their
//! own binary.

#![cfg(unix)]

use std::time::Duration;

use microbase::{Service, ServiceState};

mod common;
use common::{greeting_plugin, options, spawn, CapturedLogs};

#[tokio::test]
async fn test_sigterm_stops_the_service_cleanly() {
    let logs = CapturedLogs::default();
    let mut service = Service::new(options().with_dispatch(logs.dispatch())).unwrap();
    service.register(greeting_plugin("/"));

    let running = spawn(service).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while running.handle.state() != ServiceState::Running {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("service never started");

    let response = reqwest::get(running.url("/greet")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // The SIGTERM handler is installed by now: the serve loop has polled the
    // termination waiter before answering the request above.
    let raised = unsafe { libc::kill(libc::getpid(), libc::SIGTERM) };
    assert_eq!(raised, 0);

    let handle = running.handle.clone();
    tokio::time::timeout(Duration::from_secs(10), running.task)
        .await
        .expect("SIGTERM did not stop the service")
        .expect("service task panicked")
        .expect("service returned an error");
    assert_eq!(handle.state(), ServiceState::Stopped);

    let received = logs.matching("Shutdown signal received");
    assert_eq!(received.len(), 1, "{received:?}");
    let line: serde_json::Value = serde_json::from_str(&received[0]).unwrap();
    assert_eq!(line["fields"]["reason"], "SIGTERM");
    assert_eq!(logs.matching("Service stopped").len(), 1);
}
