//! User identity tagging.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::span::Span;

/// Propagating tag carrying the base64-encoded user id downstream.
pub const USER_ID_PROPAGATING_TAG: &str = "_dd.p.usr.id";

/// A user identity to attach to a trace.
///
/// ```rust
/// use weblog::apm::User;
///
/// let user = User::new("usr.id")
///     .email("usr.email")
///     .role("usr.role")
///     .propagate(true);
/// assert_eq!(user.id(), "usr.id");
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct User {
    id: String,
    email: Option<String>,
    name: Option<String>,
    session_id: Option<String>,
    role: Option<String>,
    scope: Option<String>,
    propagate: bool,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Self::default() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Also carry the user id in propagated trace context.
    pub fn propagate(mut self, propagate: bool) -> Self {
        self.propagate = propagate;
        self
    }
}

/// Tags the local root of `span` with `user`.
pub fn set_user(span: &Span, user: User) {
    let root = span.local_root();
    root.set_tag("usr.id", user.id.as_str());

    let optional = [
        ("usr.email", user.email),
        ("usr.name", user.name),
        ("usr.session_id", user.session_id),
        ("usr.role", user.role),
        ("usr.scope", user.scope),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            root.set_tag(key, value);
        }
    }

    if user.propagate {
        root.set_propagating_tag(USER_ID_PROPAGATING_TAG, STANDARD.encode(user.id.as_bytes()));
    }

    tracing::debug!(trace_id = %root.trace_id(), usr.id = %user.id, propagate = user.propagate, "user set on trace");
}
