//! Route groups mounted by the service.
//!
//! # Responsibilities
//! - Collect method + path + handler bindings under one path prefix
//! - Reject unknown HTTP verbs at registration time
//! - Mount the group into the service router
//!
//! # Design Decisions
//! - An unknown verb is a programming error and panics immediately
//! - A plugin is cloneable; the service mounts a copy, so the original
//!   stays usable for isolated tests through [`Plugin::inject`]
//! - Matching inside a plugin is left entirely to axum, except that a route
//!   at `/` in a nested plugin also answers the prefix with a trailing slash

use std::fmt;
use std::str::FromStr;

use axum::{
    body::Body,
    handler::Handler,
    http::{Method, Request},
    response::Response,
    routing::{delete, get, patch, post, put, MethodRouter},
    Router,
};
use tower::ServiceExt;

/// HTTP verbs a plugin route can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// Error returned when parsing an unsupported verb.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("selected HTTP method is not recognized: `{0}`")]
pub struct UnknownMethod(pub String);

impl RouteMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteMethod::Get => "GET",
            RouteMethod::Post => "POST",
            RouteMethod::Put => "PUT",
            RouteMethod::Patch => "PATCH",
            RouteMethod::Delete => "DELETE",
        }
    }
}

impl FromStr for RouteMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(RouteMethod::Get),
            "POST" => Ok(RouteMethod::Post),
            "PUT" => Ok(RouteMethod::Put),
            "PATCH" => Ok(RouteMethod::Patch),
            "DELETE" => Ok(RouteMethod::Delete),
            other => Err(UnknownMethod(other.to_string())),
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RouteMethod> for Method {
    fn from(method: RouteMethod) -> Self {
        match method {
            RouteMethod::Get => Method::GET,
            RouteMethod::Post => Method::POST,
            RouteMethod::Put => Method::PUT,
            RouteMethod::Patch => Method::PATCH,
            RouteMethod::Delete => Method::DELETE,
        }
    }
}

/// One registered route, kept for introspection and logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteBinding {
    pub method: RouteMethod,
    pub path: String,
}

/// A group of routes mounted under a common path prefix.
#[derive(Clone)]
pub struct Plugin {
    path: String,
    routes: Vec<RouteBinding>,
    router: Router,
    // Handlers bound to `/`, mounted again at `{prefix}/`.
    index: Option<MethodRouter>,
}

impl Plugin {
    /// Create an empty plugin mounted at `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            routes: Vec::new(),
            router: Router::new(),
            index: None,
        }
    }

    /// Bind `handler` to `method` and `path`.
    ///
    /// # Panics
    ///
    /// Panics if `method` is not one of GET, POST, PUT, PATCH or DELETE,
    /// or if axum rejects the path (for example a duplicate method on the
    /// same path).
    pub fn add_route<H, T>(&mut self, method: &str, path: &str, handler: H) -> &mut Self
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let method = match method.parse::<RouteMethod>() {
            Ok(method) => method,
            Err(_) => panic!("selected HTTP method is not recognized"),
        };

        let route = match method {
            RouteMethod::Get => get(handler),
            RouteMethod::Post => post(handler),
            RouteMethod::Put => put(handler),
            RouteMethod::Patch => patch(handler),
            RouteMethod::Delete => delete(handler),
        };

        if path == "/" {
            self.index = Some(match self.index.take() {
                Some(index) => index.merge(route.clone()),
                None => route.clone(),
            });
        }
        self.router = std::mem::take(&mut self.router).route(path, route);
        self.routes.push(RouteBinding {
            method,
            path: path.to_string(),
        });
        self
    }

    /// Prefix this plugin is mounted under.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Routes in registration order.
    pub fn routes(&self) -> &[RouteBinding] {
        &self.routes
    }

    /// Dispatch a request into this plugin alone, without the service
    /// middleware or the prefix.
    pub async fn inject(&self, request: Request<Body>) -> Response {
        match self.router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }

    /// Mount this plugin into `router`.
    ///
    /// A root prefix (`/` or empty) merges the routes; anything else nests
    /// them, ignoring trailing slashes. axum maps a nested `/` route to the
    /// bare prefix only, so it is registered at `{prefix}/` as well.
    pub(crate) fn mount(&self, router: Router) -> Router {
        let prefix = self.path.trim_end_matches('/');
        if prefix.is_empty() {
            return router.merge(self.router.clone());
        }

        let prefix = if prefix.starts_with('/') {
            prefix.to_string()
        } else {
            format!("/{prefix}")
        };
        let router = router.nest(&prefix, self.router.clone());
        match &self.index {
            Some(index) => router.route(&format!("{prefix}/"), index.clone()),
            None => router,
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("path", &self.path)
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}
