//! Route registration and lookup.
//!
//! Routes are written once against [`RouteRegistry`] and can be mounted on
//! either dispatcher:
//!
//! | Dispatcher | Flavour | Unmatched path | Wrong method |
//! |---|---|---|---|
//! | [`Router`] | radix tree, gin-like | 404 | 404 |
//! | [`ServeMux`] | prefix patterns, net/http-like | 404 | 405 + `allow` |
//!
//! Pattern syntax is shared: literal segments, `{name}` for one segment and
//! a trailing `{*name}` for the rest of the path.

mod mux;
mod radix;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::Method;

use crate::handler::{BoxedHandler, Handler};

pub use mux::ServeMux;
pub use radix::Router;

/// Builder side of a router.
///
/// Registering an invalid or conflicting pattern panics: routes are fixed at
/// startup and a bad table is a programming error.
pub trait RouteRegistry: Sized {
    /// Registers `handler` for `method` requests on `pattern`.
    fn on(self, method: Method, pattern: &str, handler: impl Handler) -> Self;

    /// Registers `handler` for every method on `pattern`.
    fn any(self, pattern: &str, handler: impl Handler) -> Self;

    fn get(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, pattern, handler)
    }

    fn post(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, pattern, handler)
    }
}

/// Lookup side of a router, shared by the server across connections.
pub trait Dispatch: Send + Sync + 'static {
    fn lookup(&self, method: &Method, path: &str) -> Lookup;
}

/// Outcome of a lookup.
pub enum Lookup {
    Found(RouteMatch),
    NotFound,
    /// The path exists for other methods only.
    MethodNotAllowed(Vec<Method>),
}

/// A matched route: the handler, its path parameters and the pattern it was
/// registered under.
pub struct RouteMatch {
    pub(crate) handler: BoxedHandler,
    pub(crate) params: HashMap<String, String>,
    pub(crate) pattern: String,
}

impl RouteMatch {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// Registered handler plus the pattern text it came from.
#[derive(Clone)]
pub(crate) struct Route {
    pub(crate) handler: BoxedHandler,
    pub(crate) pattern: String,
}

impl Route {
    pub(crate) fn new(pattern: &str, handler: impl Handler) -> Self {
        Self { handler: Arc::new(handler), pattern: pattern.to_owned() }
    }

    pub(crate) fn matched(&self, params: HashMap<String, String>) -> RouteMatch {
        RouteMatch {
            handler: Arc::clone(&self.handler),
            params,
            pattern: self.pattern.clone(),
        }
    }
}

/// Which dispatcher the application mounts its routes on.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum RouterKind {
    #[default]
    Radix,
    Mux,
}

impl fmt::Display for RouterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Radix => "radix",
            Self::Mux => "mux",
        })
    }
}
