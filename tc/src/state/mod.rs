//! Session state with the actor pattern
//!
//! SessionStore maps session ids to per-session actors; each actor owns one
//! Session and processes its commands in order.

mod actor;
mod manager;
mod messages;

pub use actor::SessionHandle;
pub use manager::{SessionStore, StoreStats};
pub use messages::{StateCommand, StateError, StateResponse};
