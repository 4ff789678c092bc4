//! Single outgoing event stream of the session registry.
//!
//! Every session pushes its events into one [`EventBus`] owned by the
//! registry, and the registry adds its own aggregate notifications. Exactly
//! one consumer (normally the bridge server) takes the receiving end with
//! [`EventBus::take_stream`] and fans events out further. Events emitted
//! before the stream is taken are buffered; after the stream is dropped they
//! are discarded.
//!
//! # Example
//!
//! ```rust
//! use switchboard_core::event_bus::{EventBus, RegistryEvent};
//!
//! let bus = EventBus::new();
//! let stream = bus.take_stream().unwrap();
//!
//! bus.emit(RegistryEvent::SessionsChanged);
//! assert!(bus.take_stream().is_none());
//! // stream.recv().await yields SessionsChanged
//! # drop(stream);
//! ```

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::session::SessionEvent;

/// Event published by the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// An event raised by one session.
    Session {
        session_name: String,
        event: SessionEvent,
    },
    /// The set of sessions, the active pointer or a session summary changed.
    SessionsChanged,
}

pub type EventStream = mpsc::UnboundedReceiver<RegistryEvent>;

pub struct EventBus {
    sender: mpsc::UnboundedSender<RegistryEvent>,
    receiver: Mutex<Option<EventStream>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Publish an event. Returns false if the consumer is gone.
    pub fn emit(&self, event: RegistryEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    /// A sink that tags every event with `session_name`.
    pub fn sink(&self, session_name: impl Into<String>) -> EventSink {
        EventSink {
            sender: self.sender.clone(),
            session_name: session_name.into(),
        }
    }

    /// Hand out the receiving end. Only the first call returns `Some`.
    pub fn take_stream(&self) -> Option<EventStream> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-session publishing end of the bus.
#[derive(Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<RegistryEvent>,
    session_name: String,
}

impl EventSink {
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.sender
            .send(RegistryEvent::Session {
                session_name: self.session_name.clone(),
                event,
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod event_bus {
        use super::*;

        #[test]
        fn stream_can_be_taken_once() {
            let bus = EventBus::new();
            assert!(bus.take_stream().is_some());
            assert!(bus.take_stream().is_none());
        }

        #[tokio::test]
        async fn events_emitted_before_take_are_buffered() {
            let bus = EventBus::new();
            assert!(bus.emit(RegistryEvent::SessionsChanged));

            let mut stream = bus.take_stream().unwrap();
            assert_eq!(stream.recv().await, Some(RegistryEvent::SessionsChanged));
        }

        #[test]
        fn emit_fails_after_stream_dropped() {
            let bus = EventBus::new();
            drop(bus.take_stream());
            assert!(!bus.emit(RegistryEvent::SessionsChanged));
        }

        #[tokio::test]
        async fn events_arrive_in_order() {
            let bus = EventBus::new();
            let mut stream = bus.take_stream().unwrap();
            let sink = bus.sink("main");

            sink.emit(SessionEvent::TurnStart);
            bus.emit(RegistryEvent::SessionsChanged);
            sink.emit(SessionEvent::TurnEnd);

            assert!(matches!(
                stream.recv().await,
                Some(RegistryEvent::Session { event: SessionEvent::TurnStart, .. })
            ));
            assert_eq!(stream.recv().await, Some(RegistryEvent::SessionsChanged));
            assert!(matches!(
                stream.recv().await,
                Some(RegistryEvent::Session { event: SessionEvent::TurnEnd, .. })
            ));
        }
    }

    mod event_sink {
        use super::*;

        #[tokio::test]
        async fn tags_events_with_session_name() {
            let bus = EventBus::new();
            let mut stream = bus.take_stream().unwrap();
            let sink = bus.sink("research");

            sink.emit(SessionEvent::Delta {
                content: "hi".to_string(),
            });

            match stream.recv().await {
                Some(RegistryEvent::Session {
                    session_name,
                    event,
                }) => {
                    assert_eq!(session_name, "research");
                    assert_eq!(
                        event,
                        SessionEvent::Delta {
                            content: "hi".to_string()
                        }
                    );
                }
                other => panic!("Expected session event, got {:?}", other),
            }
        }
    }
}
