//! Per-connection hub protocol.
//!
//! A [`Session`] moves `anonymous → identified → destroyed`. Identified
//! sessions are bound into the [`SessionRegistry`], which routes remote
//! operations to them regardless of whether the app behind the session is a
//! plugin or an external client.

pub mod context;
pub mod listener;
pub mod registry;
pub mod session;

pub use context::SessionContext;
pub use listener::{AppIdentified, SessionListener};
pub use registry::SessionRegistry;
pub use session::{Session, SessionId};
