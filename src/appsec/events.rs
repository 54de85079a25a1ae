//! Business event tracking: login success, login failure, custom events.
//!
//! Every event is written as tags on the local root span and forces the
//! trace to be kept.

use std::collections::BTreeMap;

use tracing::debug;

use crate::apm::Span;
use crate::apm::context::priority;

const LOGIN_SUCCESS_PREFIX: &str = "appsec.events.users.login.success";
const LOGIN_FAILURE_PREFIX: &str = "appsec.events.users.login.failure";

/// Free-form key/value attributes attached to an event.
pub type Metadata = BTreeMap<String, String>;

pub fn track_user_login_success_event(span: Option<&Span>, user_id: &str, metadata: &Metadata) {
    let Some(root) = event_root(span) else { return };
    root.set_tag(format!("{LOGIN_SUCCESS_PREFIX}.track"), "true");
    root.set_tag(format!("_dd.{LOGIN_SUCCESS_PREFIX}.sdk"), "true");
    root.set_tag("usr.id", user_id);
    tag_metadata(&root, LOGIN_SUCCESS_PREFIX, metadata);
    debug!(trace_id = %root.trace_id(), usr.id = user_id, "login success tracked");
}

pub fn track_user_login_failure_event(
    span: Option<&Span>,
    user_id: &str,
    exists: bool,
    metadata: &Metadata,
) {
    let Some(root) = event_root(span) else { return };
    root.set_tag(format!("{LOGIN_FAILURE_PREFIX}.track"), "true");
    root.set_tag(format!("_dd.{LOGIN_FAILURE_PREFIX}.sdk"), "true");
    root.set_tag(format!("{LOGIN_FAILURE_PREFIX}.usr.id"), user_id);
    root.set_tag(format!("{LOGIN_FAILURE_PREFIX}.usr.exists"), exists.to_string());
    tag_metadata(&root, LOGIN_FAILURE_PREFIX, metadata);
    debug!(trace_id = %root.trace_id(), usr.id = user_id, exists, "login failure tracked");
}

pub fn track_custom_event(span: Option<&Span>, name: &str, metadata: &Metadata) {
    let Some(root) = event_root(span) else { return };
    let prefix = format!("appsec.events.{name}");
    root.set_tag(format!("{prefix}.track"), "true");
    tag_metadata(&root, &prefix, metadata);
    debug!(trace_id = %root.trace_id(), event = name, "custom event tracked");
}

fn event_root(span: Option<&Span>) -> Option<Span> {
    let root = span?.local_root();
    root.set_sampling_priority(priority::USER_KEEP);
    Some(root)
}

fn tag_metadata(root: &Span, prefix: &str, metadata: &Metadata) {
    for (key, value) in metadata {
        root.set_tag(format!("{prefix}.{key}"), value.as_str());
    }
}
