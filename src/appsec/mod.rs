//! Application security: request body monitoring and business events.
//!
//! Both halves only ever write to the trace. Nothing here can alter or
//! block an HTTP response.

pub mod events;
pub mod monitor;

pub use events::{Metadata, track_custom_event, track_user_login_failure_event, track_user_login_success_event};
pub use monitor::{Finding, Monitor, monitor_parsed_http_body, monitor_path_params};
