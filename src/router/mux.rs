//! Prefix-pattern request multiplexer.
//!
//! Semantics follow the classic `ServeMux` model:
//!
//! - a pattern ending in `/` matches its whole subtree (`/` matches
//!   everything), as does a pattern ending in `{*name}`
//! - any other pattern matches its path exactly
//! - the most specific matching pattern wins: more segments first, then
//!   exact over subtree, then more literal segments
//! - a path that only matches patterns registered for other methods is
//!   answered with 405
//!
//! `HEAD` falls back to a `GET` registration.

use std::collections::HashMap;

use http::Method;

use super::{Dispatch, Lookup, Route, RouteRegistry};
use crate::handler::Handler;

#[derive(Debug)]
enum Segment {
    Literal(String),
    Param(String),
}

struct Entry {
    pattern: String,
    segments: Vec<Segment>,
    subtree: bool,
    /// Name bound to the remainder of a subtree match, if any.
    rest: Option<String>,
    methods: Vec<(Method, Route)>,
    any: Option<Route>,
}

impl Entry {
    fn parse(pattern: &str) -> Self {
        let Some(body) = pattern.strip_prefix('/') else {
            panic!("invalid route `{pattern}`: must start with `/`");
        };

        let mut subtree = body.is_empty() || body.ends_with('/');
        let mut rest = None;
        let mut segments = Vec::new();
        let parts: Vec<&str> = body.trim_end_matches('/').split('/').filter(|s| !s.is_empty()).collect();

        for (i, part) in parts.iter().enumerate() {
            if let Some(name) = part.strip_prefix("{*").and_then(|p| p.strip_suffix('}')) {
                if i + 1 != parts.len() {
                    panic!("invalid route `{pattern}`: `{{*{name}}}` must be last");
                }
                subtree = true;
                rest = Some(name.to_owned());
            } else if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                if name.is_empty() {
                    panic!("invalid route `{pattern}`: empty parameter name");
                }
                segments.push(Segment::Param(name.to_owned()));
            } else {
                segments.push(Segment::Literal((*part).to_owned()));
            }
        }

        Self {
            pattern: pattern.to_owned(),
            segments,
            subtree,
            rest,
            methods: Vec::new(),
            any: None,
        }
    }

    /// Same segments up to parameter names.
    fn same_shape(&self, other: &Entry) -> bool {
        self.subtree == other.subtree
            && self.segments.len() == other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|pair| match pair {
                (Segment::Literal(a), Segment::Literal(b)) => a == b,
                (Segment::Param(_), Segment::Param(_)) => true,
                _ => false,
            })
    }

    fn specificity(&self) -> (usize, bool, usize) {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        (self.segments.len(), !self.subtree, literals)
    }

    fn matches(&self, path: &[&str]) -> Option<HashMap<String, String>> {
        let fixed = self.segments.len();
        if self.subtree {
            if path.len() <= fixed {
                return None;
            }
        } else if path.len() != fixed {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, value) in self.segments.iter().zip(path) {
            match segment {
                Segment::Literal(lit) if lit == value => {}
                Segment::Param(name) if !value.is_empty() => {
                    params.insert(name.clone(), (*value).to_owned());
                }
                _ => return None,
            }
        }
        if let Some(name) = &self.rest {
            params.insert(name.clone(), path[fixed.min(path.len())..].join("/"));
        }
        Some(params)
    }

    fn route_for(&self, method: &Method) -> Option<&Route> {
        let exact = |m: &Method| self.methods.iter().find(|(rm, _)| rm == m).map(|(_, r)| r);
        exact(method)
            .or_else(|| (*method == Method::HEAD).then(|| exact(&Method::GET)).flatten())
            .or(self.any.as_ref())
    }
}

/// The mux dispatcher.
#[derive(Default)]
pub struct ServeMux {
    entries: Vec<Entry>,
}

impl ServeMux {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, pattern: &str) -> &mut Entry {
        let parsed = Entry::parse(pattern);
        if let Some(existing) = self.entries.iter().position(|e| e.same_shape(&parsed)) {
            if self.entries[existing].pattern != pattern {
                panic!(
                    "invalid route `{pattern}`: conflicts with `{}`",
                    self.entries[existing].pattern
                );
            }
            return &mut self.entries[existing];
        }
        // Most specific first, so lookup can stop at the first hit.
        let idx = self
            .entries
            .partition_point(|e| e.specificity() >= parsed.specificity());
        self.entries.insert(idx, parsed);
        &mut self.entries[idx]
    }
}

impl RouteRegistry for ServeMux {
    fn on(mut self, method: Method, pattern: &str, handler: impl Handler) -> Self {
        let route = Route::new(pattern, handler);
        let entry = self.entry(pattern);
        if entry.any.is_some() || entry.methods.iter().any(|(m, _)| *m == method) {
            panic!("invalid route `{pattern}`: {method} registered twice");
        }
        entry.methods.push((method, route));
        self
    }

    fn any(mut self, pattern: &str, handler: impl Handler) -> Self {
        let route = Route::new(pattern, handler);
        let entry = self.entry(pattern);
        if entry.any.is_some() || !entry.methods.is_empty() {
            panic!("invalid route `{pattern}`: registered twice");
        }
        entry.any = Some(route);
        self
    }
}

impl Dispatch for ServeMux {
    fn lookup(&self, method: &Method, path: &str) -> Lookup {
        let segments: Vec<&str> = path.strip_prefix('/').unwrap_or(path).split('/').collect();

        let mut allowed = Vec::new();
        for entry in &self.entries {
            let Some(params) = entry.matches(&segments) else {
                continue;
            };
            if let Some(route) = entry.route_for(method) {
                return Lookup::Found(route.matched(params));
            }
            for (m, _) in &entry.methods {
                if !allowed.contains(m) {
                    allowed.push(m.clone());
                }
            }
        }

        if allowed.is_empty() {
            Lookup::NotFound
        } else {
            Lookup::MethodNotAllowed(allowed)
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

    fn pattern(mux: &ServeMux, method: Method, path: &str) -> Option<String> {
        match mux.lookup(&method, path) {
            Lookup::Found(m) => Some(m.pattern),
            _ => None,
        }
    }

    #[test]
    fn root_pattern_catches_everything() {
        let mux = ServeMux::new().any("/", ok).any("/status", ok);
        assert_eq!(pattern(&mux, Method::GET, "/").as_deref(), Some("/"));
        assert_eq!(pattern(&mux, Method::GET, "/status").as_deref(), Some("/status"));
        assert_eq!(pattern(&mux, Method::GET, "/status/x").as_deref(), Some("/"));
        assert_eq!(pattern(&mux, Method::GET, "/unknown/deep").as_deref(), Some("/"));
    }

    #[test]
    fn trailing_slash_patterns_match_subtrees() {
        let mux = ServeMux::new().any("/headers", ok).any("/headers/", ok);
        assert_eq!(pattern(&mux, Method::GET, "/headers").as_deref(), Some("/headers"));
        assert_eq!(pattern(&mux, Method::GET, "/headers/").as_deref(), Some("/headers/"));
        assert_eq!(pattern(&mux, Method::GET, "/headers/a/b").as_deref(), Some("/headers/"));
        assert!(pattern(&mux, Method::GET, "/other").is_none());
    }

    #[test]
    fn tail_parameter_binds_remainder() {
        let mux = ServeMux::new().any("/waf", ok).any("/waf/{*rest}", ok);
        match mux.lookup(&Method::POST, "/waf/a/b") {
            Lookup::Found(m) => {
                assert_eq!(m.pattern, "/waf/{*rest}");
                assert_eq!(m.params["rest"], "a/b");
            }
            _ => panic!("expected a match"),
        }
        match mux.lookup(&Method::POST, "/waf/") {
            Lookup::Found(m) => assert_eq!(m.params["rest"], ""),
            _ => panic!("expected a match"),
        }
        assert_eq!(pattern(&mux, Method::POST, "/waf").as_deref(), Some("/waf"));
    }

    #[test]
    fn params_and_literal_precedence() {
        let mux = ServeMux::new()
            .any("/params/{myParam}", ok)
            .any("/params/special", ok);
        assert_eq!(pattern(&mux, Method::GET, "/params/special").as_deref(), Some("/params/special"));
        match mux.lookup(&Method::GET, "/params/42") {
            Lookup::Found(m) => assert_eq!(m.params["myParam"], "42"),
            _ => panic!("expected a match"),
        }
        assert!(pattern(&mux, Method::GET, "/params/").is_none());
        assert!(pattern(&mux, Method::GET, "/params/1/2").is_none());
    }

    #[test]
    fn wrong_method_is_405_with_allowed_list() {
        let mux = ServeMux::new().get("/custom_event", ok);
        match mux.lookup(&Method::POST, "/custom_event") {
            Lookup::MethodNotAllowed(allowed) => assert_eq!(allowed, vec![Method::GET]),
            _ => panic!("expected 405"),
        }
        assert!(pattern(&mux, Method::HEAD, "/custom_event").is_some());
    }

    #[test]
    fn allowed_list_has_no_duplicates_across_entries() {
        let mux = ServeMux::new()
            .get("/users/{id}", ok)
            .on(Method::PUT, "/users/{id}", ok)
            .get("/users/me", ok);
        match mux.lookup(&Method::DELETE, "/users/me") {
            Lookup::MethodNotAllowed(allowed) => {
                assert_eq!(allowed.len(), 2, "{allowed:?}");
                assert!(allowed.contains(&Method::GET));
                assert!(allowed.contains(&Method::PUT));
            }
            _ => panic!("expected 405"),
        }
    }

    #[test]
    fn less_specific_catch_all_still_serves_other_methods() {
        let mux = ServeMux::new().any("/", ok).get("/custom_event", ok);
        assert_eq!(pattern(&mux, Method::POST, "/custom_event").as_deref(), Some("/"));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let _ = ServeMux::new().any("/a", ok).any("/a", ok);
    }

    #[test]
    #[should_panic(expected = "conflicts with")]
    fn differently_named_params_conflict() {
        let _ = ServeMux::new().any("/a/{x}", ok).any("/a/{y}", ok);
    }
}
