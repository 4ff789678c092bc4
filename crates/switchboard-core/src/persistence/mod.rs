//! Read-only index of engine sessions persisted on disk.
//!
//! The registry consults a [`SessionStore`] to offer previous conversations
//! for resumption. Nothing in this crate writes records during normal
//! operation; the engine owns them.

pub mod index;

pub use index::{DirectorySessionStore, PersistedSession, SessionStore, StoreError};
