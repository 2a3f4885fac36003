//! Streaming chat client core for the AI twin portfolio widget.
//!
//! The crate wires a send pipeline (entry guard → transcript append →
//! request → stream consumption → settlement) over pluggable boundaries:
//! a [`transport::ChatTransport`] for the HTTP endpoint, a
//! [`store::KeyValueStore`] for durable per-profile state, and a
//! [`surface::ChatSurface`] for rendering. The decoder, governor, and
//! language detector are plain testable leaves underneath.

pub mod config;
pub mod error;
pub mod governor;
pub mod lang;
pub mod logging;
pub mod pipeline;
pub mod store;
pub mod stream;
pub mod surface;
pub mod transport;
pub mod types;

pub use config::ChatConfig;
pub use error::ChatError;
pub use pipeline::{ChatSession, TurnOutcome};
pub use types::{Message, Role};
