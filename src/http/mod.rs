//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → pipeline (stamp identity, run checkpoints)
//!     → transport.rs (rewrite URI, forward upstream)
//!     → Send response to client (or drop the connection)
//! ```

pub mod server;
pub mod transport;

pub use server::HttpServer;
pub use transport::{ForwardError, ForwardTransport, HyperTransport};
