//! NAT-traversal relay: brokers TCP sessions between swarm peers that can't
//! reach each other directly (`server`), and dials through a relay as a
//! fallback to a direct connection attempt (`dialer`).

pub mod dialer;
pub mod error;
pub mod protocol;
pub mod server;

pub use dialer::{RelayDialer, RelayedStream};
pub use error::{RelayError, Result};
pub use protocol::ControlMessage;
pub use server::RelayServer;
