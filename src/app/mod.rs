//! The application: one handler set, mountable on any router.
//!
//! | Route | Methods | Effect |
//! |---|---|---|
//! | `/` | any | empty 200 |
//! | `/waf`, `/waf/{*rest}` | any | parsed body → appsec monitor |
//! | `/sample_rate_route/{i}` | any | `OK` |
//! | `/params/{myParam}` | any | parameter → appsec monitor, `OK` |
//! | `/status?code=` | any | echoes a valid status |
//! | `/make_distant_call?url=` | any | traced outbound `GET` |
//! | `/headers`, `/headers/` | any | four fixed headers |
//! | `/identify`, `/identify/`, `/identify-propagate` | any | user on trace |
//! | `/user_login_success_event`, `/user_login_failure_event`, `/custom_event` | GET | appsec events |

pub mod body;
pub mod handlers;

use std::sync::Arc;

use crate::apm::{TracedClient, Tracer};
use crate::handler::with_state;
use crate::router::RouteRegistry;

/// State shared by the handlers that need more than the request.
pub struct App {
    client: TracedClient,
    tracer: Arc<Tracer>,
}

impl App {
    pub fn new(tracer: Arc<Tracer>) -> Arc<Self> {
        Arc::new(Self { client: TracedClient::new(Arc::clone(&tracer)), tracer })
    }
}

/// Registers every weblog route on `registry`.
pub fn routes<R: RouteRegistry>(registry: R, app: Arc<App>) -> R {
    registry
        .any("/", handlers::root)
        .any("/waf", handlers::waf)
        .any("/waf/{*rest}", handlers::waf_subtree)
        .any("/sample_rate_route/{i}", handlers::ok)
        .any("/params/{myParam}", handlers::params)
        .any("/status", handlers::status)
        .any("/make_distant_call", with_state(app, handlers::make_distant_call))
        .any("/headers", handlers::headers)
        .any("/headers/", handlers::headers)
        .any("/identify", handlers::identify)
        .any("/identify/", handlers::identify)
        .any("/identify-propagate", handlers::identify_propagate)
        .get("/user_login_success_event", handlers::user_login_success_event)
        .get("/user_login_failure_event", handlers::user_login_failure_event)
        .get("/custom_event", handlers::custom_event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apm::{self, MemoryExporter, TracerConfig};
    use crate::router::{Dispatch, Lookup, Router, ServeMux};
    use http::Method;

    fn found<D: Dispatch>(dispatch: &D, method: Method, path: &str) -> Option<String> {
        match dispatch.lookup(&method, path) {
            Lookup::Found(m) => Some(m.pattern().to_owned()),
            _ => None,
        }
    }

    #[test]
    fn both_routers_accept_the_route_table() {
        let tracer = apm::start(TracerConfig::default(), Box::new(MemoryExporter::default()));
        let radix = routes(Router::new(), App::new(Arc::clone(&*tracer)));
        let mux = routes(ServeMux::new(), App::new(Arc::clone(&*tracer)));

        for path in ["/", "/waf", "/waf/", "/waf/a/b", "/params/1", "/status", "/headers/", "/identify-propagate"] {
            assert!(found(&radix, Method::POST, path).is_some(), "radix {path}");
            assert!(found(&mux, Method::POST, path).is_some(), "mux {path}");
        }

        assert_eq!(found(&radix, Method::GET, "/unknown"), None);
        assert_eq!(found(&mux, Method::GET, "/unknown").as_deref(), Some("/"));
        assert_eq!(found(&mux, Method::GET, "/headers/x").as_deref(), Some("/headers/"));
        assert_eq!(found(&radix, Method::GET, "/headers/x"), None);
    }
}
