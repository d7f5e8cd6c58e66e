//! Example greeting service built on microbase.
//!
//! ```text
//! GET /greet          → {"message":"Hello, World!"}
//! GET /greet/{who}    → {"message":"Hello, {who}!"}
//! GET /-/healthz, /-/ready, /-/check-up, /-/metrics
//! ```

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use axum::extract::Path;
use axum::response::Response;
use clap::Parser;
use metrics::Counter;
use serde::Serialize;

use microbase::config::{load_config, validate_config, ConfigError, ServiceConfig};
use microbase::{json, MetricsFactory, MetricsRegistrar, Plugin, Service, ServiceOptions};

#[derive(Debug, Parser)]
#[command(name = "microbase", version, about = "Example greeting service")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "SERVICE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    #[arg(long, env = "HTTP_PORT")]
    http_port: Option<u16>,
}

#[derive(Serialize)]
struct Greeting {
    message: String,
}

/// Greeting handlers and the counter they share.
///
/// The counter is filled in when the service runs this registrar, so it
/// always belongs to that service's registry.
#[derive(Clone, Default)]
struct Greetings {
    served: Arc<OnceLock<Counter>>,
}

impl MetricsRegistrar for Greetings {
    fn register(&self, factory: &MetricsFactory) {
        let counter = factory.counter("greetings_total", "number of greetings served");
        let _ = self.served.set(counter);
    }
}

impl Greetings {
    fn greet(&self, who: &str) -> Response {
        if let Some(counter) = self.served.get() {
            counter.increment(1);
        }
        json(&Greeting {
            message: format!("Hello, {who}!"),
        })
    }

    fn plugin(&self) -> Plugin {
        let world = self.clone();
        let named = self.clone();

        let mut plugin = Plugin::new("/");
        plugin
            .add_route("GET", "/greet", move || {
                let greetings = world.clone();
                async move { greetings.greet("World") }
            })
            .add_route("GET", "/greet/{who}", move |Path(who): Path<String>| {
                let greetings = named.clone();
                async move { greetings.greet(&who) }
            });
        plugin
    }
}

fn load(cli: &Cli) -> Result<ServiceConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(port) = cli.http_port {
        config.http_port = port;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load(&cli)?;

    let greetings = Greetings::default();
    let options = ServiceOptions::from_config(&config).with_metrics(greetings.clone());
    let mut service = Service::new(options)?;
    service.register(greetings.plugin());

    service.start(config.http_port).await?;
    Ok(())
}
