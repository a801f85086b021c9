//! Network Module
//!
//! TCP server side of the docbridge protocol.
//!
//! ## Architecture
//! - Single non-blocking acceptor loop observing a shutdown flag
//! - One handler thread per connection, capped at `max_connections`
//! - Every command runs against a shared `DocumentStore`

mod server;
mod connection;

pub use server::{Server, ShutdownHandle};
pub use connection::{Connection, ServerAuth};
