//! Sessions and the registry that owns them.

pub mod error;
pub mod event;
pub mod message;
pub mod registry;
pub mod state;

pub use error::SessionError;
pub use event::SessionEvent;
pub use message::{ChatMessage, Role};
pub use registry::SessionRegistry;
pub use state::{Session, SessionParams, SessionSummary};
