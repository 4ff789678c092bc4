//! # switchboard-core
//!
//! Session registry for driving several agent conversations at once.
//!
//! This crate is transport-agnostic and can be used by:
//! - the WebSocket bridge (`switchboard-http`)
//! - any other driver that talks to [`SessionRegistry`] directly
//!
//! ## Key Concepts
//!
//! - **Engine**: the external agent runtime that answers prompts
//! - **Session**: one named conversation bound to an engine session
//! - **Turn**: a prompt and the engine's complete response
//! - **Envelope**: the `{type, payload}` wire message clients exchange

pub mod context;
pub mod engine;
pub mod event_bus;
pub mod logging;
pub mod paths;
pub mod persistence;
pub mod protocol;
pub mod session;

// Re-export commonly used types
pub use context::AppContext;
pub use engine::{Engine, EngineEvent, EngineSession};
pub use event_bus::RegistryEvent;
pub use protocol::Envelope;
pub use session::{Session, SessionError, SessionEvent, SessionRegistry};
