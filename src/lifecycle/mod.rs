//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     GatewayConfig → GatewayContext → bind listeners → serve
//!     any failure → StartupError → fallback server
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C → broadcast → both listeners drain and stop
//! ```

pub mod shutdown;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{run, serve_fallback, Gateway, GatewayContext, StartupError};
