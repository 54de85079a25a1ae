//! Middleware layer.
//!
//! Middleware wraps handler execution for cross-cutting concerns. The server
//! runs every request, matched or not, through [`trace::traced`].

pub mod trace;

pub use trace::traced;
