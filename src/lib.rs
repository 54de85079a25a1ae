//! # weblog
//!
//! A small HTTP application that exercises an APM tracer and its appsec
//! layer. Each route calls one instrumentation entry point (open a span,
//! tag a user, monitor a body, track an event, propagate context into an
//! outbound call) and returns a canned response, so an external test
//! harness can assert on the traces it produces.
//!
//! ## Layout
//!
//! - [`apm`]: spans, propagation, sampling, exporters, traced client
//! - [`appsec`]: request body monitor and business event tracking
//! - [`router`]: one route table over a radix [`Router`] or a [`ServeMux`]
//! - [`middleware`]: the per-request server span
//! - [`server`]: hyper accept loop with graceful shutdown
//! - [`app`]: the handlers and their route table
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use weblog::apm::{self, JsonLinesExporter, TracerConfig};
//! use weblog::app::{App, routes};
//! use weblog::{Router, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), weblog::Error> {
//!     let tracer = apm::start(TracerConfig::default(), Box::new(JsonLinesExporter::stdout()));
//!     let app = routes(Router::new(), App::new(tracer.clone()));
//!     Server::bind("0.0.0.0:7777")?.serve(app, tracer.clone()).await
//! }
//! ```

pub mod apm;
pub mod app;
pub mod appsec;
pub mod config;
mod error;
mod handler;
pub mod logging;
pub mod middleware;
mod request;
mod response;
pub mod router;
pub mod server;

pub use config::Config;
pub use error::Error;
pub use handler::{Handler, WithState, with_state};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::{Dispatch, RouteRegistry, Router, RouterKind, ServeMux};
pub use server::Server;
