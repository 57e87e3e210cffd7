//! # Network Module
//!
//! Session plumbing between nodes. Flows depend only on
//! [`SessionTransport`]; [`InMemoryNetwork`] carries [`Envelope`]s between
//! tokio tasks inside one process.
//!
//! ```text
//! messages.rs : SessionMessage / SessionReply / Envelope
//! transport.rs: SessionTransport trait, TransportError, NetworkMap
//! memory.rs   : InMemoryNetwork and its per-node NetworkHandle
//! ```

pub mod memory;
pub mod messages;
pub mod transport;

pub use memory::{InMemoryNetwork, NetworkHandle};
pub use messages::{Envelope, SessionId, SessionMessage, SessionReply};
pub use transport::{NetworkMap, SessionTransport, TransportError};
