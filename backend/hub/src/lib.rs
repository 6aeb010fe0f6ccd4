//! `storehub-hub`: the application composition root.

pub mod application;
pub mod error;
pub mod sessions;

pub use application::{Application, ApplicationDeps};
pub use error::HubError;
pub use sessions::SessionHub;
