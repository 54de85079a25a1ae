//! The [`Handler`] trait and its type erasure.
//!
//! Anything implementing [`Handler`] can be registered on a router. Two
//! shapes are covered out of the box:
//!
//! ```text
//! async fn status(req: Request) -> impl IntoResponse            plain
//! async fn call(app: Arc<App>, req: Request) -> impl IntoResponse
//!        ↓ with_state(app, call)                                 stateful
//! ```
//!
//! Routers store each one as `Arc<dyn Handler>`, so a request costs one
//! virtual call and one boxed future.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

pub(crate) type BoxedHandler = Arc<dyn Handler>;

/// A request handler.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, req: Request) -> BoxFuture;
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    fn handle(&self, req: Request) -> BoxFuture {
        let fut = self(req);
        Box::pin(async move { fut.await.into_response() })
    }
}

/// Handler that receives a shared `Arc<S>` ahead of the request.
pub struct WithState<S, F> {
    state: Arc<S>,
    f: F,
}

/// Binds `state` to a two-argument handler.
///
/// ```rust
/// use std::sync::Arc;
/// use weblog::{Request, RouteRegistry, Router, with_state};
///
/// struct Greeting(&'static str);
///
/// async fn greet(greeting: Arc<Greeting>, _req: Request) -> &'static str {
///     greeting.0
/// }
///
/// let router = Router::new().get("/", with_state(Arc::new(Greeting("hi")), greet));
/// ```
pub fn with_state<S, F, Fut, R>(state: Arc<S>, f: F) -> WithState<S, F>
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    WithState { state, f }
}

impl<S, F, Fut, R> Handler for WithState<S, F>
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    fn handle(&self, req: Request) -> BoxFuture {
        let fut = (self.f)(Arc::clone(&self.state), req);
        Box::pin(async move { fut.await.into_response() })
    }
}
