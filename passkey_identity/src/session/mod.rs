//! Signed session tokens backed by stored sessions.

mod lifecycle;
mod types;

pub use types::{Session, SessionGrant, VerifiedSession};
