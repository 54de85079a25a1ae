//! Accept loop for the weblog, with draining on shutdown.
//!
//! On SIGTERM or Ctrl-C the server:
//! 1. stops `listener.accept()`, so no new connections are made;
//! 2. asks every open connection to finish its in-flight request and close;
//! 3. returns from [`Server::serve`] once all connection tasks are done,
//!    which lets `main` flush the tracer and exit.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{ALLOW, HeaderValue};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::apm::Tracer;
use crate::error::Error;
use crate::middleware::traced;
use crate::request::Request;
use crate::response::Response;
use crate::router::{Dispatch, Lookup};

/// Listener address plus the serve loop.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Parses `addr`. The socket itself is opened by [`serve`](Server::serve).
    ///
    /// ```rust
    /// use weblog::Server;
    /// let server = Server::bind("0.0.0.0:7777").unwrap();
    /// assert!(Server::bind("not an address").is_err());
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr = addr
            .parse()
            .map_err(|source| Error::Addr { addr: addr.to_owned(), source })?;
        Ok(Self { addr })
    }

    /// Accepts connections and dispatches them through `app` until a
    /// shutdown signal arrives and every connection has drained.
    pub async fn serve(self, app: impl Dispatch, tracer: Arc<Tracer>) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        serve_with_shutdown(listener, app, tracer, shutdown_signal()).await
    }
}

/// Serves on an already bound listener until `shutdown` resolves.
///
/// Tests bind `127.0.0.1:0` and pass a oneshot receiver as `shutdown`.
pub async fn serve_with_shutdown(
    listener: TcpListener,
    app: impl Dispatch,
    tracer: Arc<Tracer>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Error> {
    let app = Arc::new(app);
    info!(addr = %listener.local_addr()?, "weblog listening");

    let mut tasks = tokio::task::JoinSet::new();
    let (stop_tx, stop_rx) = watch::channel(());

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            // Shutdown is checked first so a signal stops accepting at once,
            // even with connections still queued.
            biased;

            () = &mut shutdown => {
                info!(open = tasks.len(), "stopping accept loop");
                break;
            }

            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };

                let app = Arc::clone(&app);
                let tracer = Arc::clone(&tracer);
                let mut stop = stop_rx.clone();
                let io = TokioIo::new(stream);

                tasks.spawn(async move {
                    let svc = service_fn(move |req| {
                        let app = Arc::clone(&app);
                        let tracer = Arc::clone(&tracer);
                        async move { dispatch(app.as_ref(), &tracer, req).await }
                    });

                    let builder = ConnBuilder::new(TokioExecutor::new());
                    let conn = builder.serve_connection(io, svc);
                    tokio::pin!(conn);

                    let res = tokio::select! {
                        res = conn.as_mut() => res,
                        _ = stop.changed() => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                    };
                    if let Err(e) = res {
                        warn!(%peer, "connection error: {e}");
                    }
                });
            }

            // Reap finished connection tasks so the set does not grow
            // without bound.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    let _ = stop_tx.send(());
    while tasks.join_next().await.is_some() {}

    info!("weblog stopped");
    Ok(())
}

/// Routes one request and produces one response. Every failure is turned
/// into a response here, so hyper never sees an error.
async fn dispatch<D: Dispatch>(
    app: &D,
    tracer: &Arc<Tracer>,
    req: hyper::Request<Incoming>,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("failed to read request body: {e}");
            return Ok(Response::status(StatusCode::BAD_REQUEST).into_inner());
        }
    };

    let lookup = app.lookup(&parts.method, parts.uri.path());
    let mut req = Request::new(parts, body, Default::default());

    let response = match lookup {
        Lookup::Found(route) => {
            req.set_params(route.params);
            let handler = route.handler;
            traced(tracer, Some(route.pattern.as_str()), req, |req| handler.handle(req)).await
        }
        Lookup::NotFound => {
            traced(tracer, None, req, |_| async { Response::status(StatusCode::NOT_FOUND) }).await
        }
        Lookup::MethodNotAllowed(allowed) => {
            traced(tracer, None, req, |_| async move { method_not_allowed(&allowed) }).await
        }
    };

    Ok(response.into_inner())
}

fn method_not_allowed(allowed: &[http::Method]) -> Response {
    let mut res = Response::status(StatusCode::METHOD_NOT_ALLOWED);
    let list = allowed.iter().map(http::Method::as_str).collect::<Vec<_>>().join(", ");
    if let Ok(value) = HeaderValue::from_str(&list) {
        res.headers_mut().insert(ALLOW, value);
    }
    res
}

/// Resolves on the first SIGTERM or SIGINT the process receives.
/// Only Ctrl-C is available off Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_rejects_bad_address() {
        match Server::bind("localhost") {
            Err(Error::Addr { addr, .. }) => assert_eq!(addr, "localhost"),
            _ => panic!("expected an address error"),
        }
    }

    #[test]
    fn allow_header_lists_methods() {
        let res = method_not_allowed(&[http::Method::GET, http::Method::HEAD]);
        assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.header("allow"), Some("GET, HEAD"));
    }
}
