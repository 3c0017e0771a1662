//! booksync-middleware: Pluggable pub/sub transport abstractions
//!
//! Provides the `Transport` / `Subscription` traits used by book sessions,
//! with an in-memory implementation for tests and a core NATS implementation.

pub mod error;
pub mod memory;
pub mod nats;
pub mod transport;

pub use error::TransportError;
pub use memory::InMemoryTransport;
pub use nats::{sanitize_subject_token, NatsTransport, SubjectBuilder};
pub use transport::{now_millis, Subscription, Transport, TransportMessage, EVENT_HEADER};
