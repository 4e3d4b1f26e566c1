//! Stream composition
//!
//! Merges thinking steps and completion fragments into one paced stream of
//! envelopes.

mod composer;
mod envelope;

pub use composer::{ChatStream, ComposerOptions, StreamComposer, is_delimiter};
pub use envelope::{Envelope, EnvelopeKind};
