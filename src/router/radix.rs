//! Radix-tree request router.
//!
//! One tree per HTTP method plus one tree for method-agnostic routes.
//! O(path-length) lookup via matchit. Method-specific routes are tried
//! first; a path registered only for other methods is a plain 404.

use std::collections::HashMap;

use http::Method;
use matchit::Router as MatchitRouter;

use super::{Dispatch, Lookup, Route, RouteRegistry};
use crate::handler::Handler;

/// The radix dispatcher.
///
/// A trailing `{*name}` also matches the bare prefix with its trailing slash,
/// so `/waf/{*rest}` answers `/waf/` with `rest` empty.
pub struct Router {
    by_method: HashMap<Method, MatchitRouter<Route>>,
    any: MatchitRouter<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self { by_method: HashMap::new(), any: MatchitRouter::new() }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

fn insert(tree: &mut MatchitRouter<Route>, pattern: &str, route: Route) {
    if let Some(prefix) = tail_prefix(pattern) {
        // Ignored on conflict: an explicit route for the prefix wins.
        let _ = tree.insert(prefix, route.clone());
    }
    tree.insert(pattern, route)
        .unwrap_or_else(|e| panic!("invalid route `{pattern}`: {e}"));
}

/// `/waf/{*rest}` → `/waf/`.
fn tail_prefix(pattern: &str) -> Option<&str> {
    let idx = pattern.rfind("/{*")?;
    pattern.ends_with('}').then(|| &pattern[..=idx])
}

fn lookup_in(tree: &MatchitRouter<Route>, path: &str) -> Option<super::RouteMatch> {
    let matched = tree.at(path).ok()?;
    let params = matched
        .params
        .iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
    Some(matched.value.matched(params))
}

impl RouteRegistry for Router {
    fn on(mut self, method: Method, pattern: &str, handler: impl Handler) -> Self {
        insert(self.by_method.entry(method).or_default(), pattern, Route::new(pattern, handler));
        self
    }

    fn any(mut self, pattern: &str, handler: impl Handler) -> Self {
        insert(&mut self.any, pattern, Route::new(pattern, handler));
        self
    }
}

impl Dispatch for Router {
    fn lookup(&self, method: &Method, path: &str) -> Lookup {
        let found = self
            .by_method
            .get(method)
            .and_then(|tree| lookup_in(tree, path))
            .or_else(|| lookup_in(&self.any, path));
        match found {
            Some(route) => Lookup::Found(route),
            None => Lookup::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Request, Response};

    async fn ok(_req: Request) -> Response {
        Response::text("ok")
    }

    fn found(router: &Router, method: Method, path: &str) -> Option<(String, HashMap<String, String>)> {
        match router.lookup(&method, path) {
            Lookup::Found(m) => Some((m.pattern, m.params)),
            _ => None,
        }
    }

    #[test]
    fn matches_literals_params_and_tails() {
        let router = Router::new()
            .any("/", ok)
            .any("/waf", ok)
            .any("/waf/{*rest}", ok)
            .any("/params/{myParam}", ok);

        assert_eq!(found(&router, Method::GET, "/").unwrap().0, "/");
        assert!(found(&router, Method::GET, "/nope").is_none());

        let (pattern, params) = found(&router, Method::POST, "/params/abc").unwrap();
        assert_eq!(pattern, "/params/{myParam}");
        assert_eq!(params["myParam"], "abc");

        let (pattern, params) = found(&router, Method::PUT, "/waf/a/b").unwrap();
        assert_eq!(pattern, "/waf/{*rest}");
        assert_eq!(params["rest"], "a/b");

        assert_eq!(found(&router, Method::GET, "/waf/").unwrap().0, "/waf/{*rest}");
        assert_eq!(found(&router, Method::GET, "/waf").unwrap().0, "/waf");
    }

    #[test]
    fn method_routes_do_not_leak_to_other_methods() {
        let router = Router::new().get("/custom_event", ok).post("/form", ok);
        assert!(found(&router, Method::GET, "/custom_event").is_some());
        assert!(matches!(router.lookup(&Method::POST, "/custom_event"), Lookup::NotFound));
        assert!(matches!(router.lookup(&Method::GET, "/form"), Lookup::NotFound));
    }

    #[test]
    fn trailing_slash_is_a_distinct_path() {
        let router = Router::new().any("/headers", ok);
        assert!(found(&router, Method::GET, "/headers").is_some());
        assert!(found(&router, Method::GET, "/headers/").is_none());
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn conflicting_routes_panic() {
        let _ = Router::new().any("/a/{x}", ok).any("/a/{y}", ok);
    }
}
