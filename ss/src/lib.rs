//! SessionStore - bounded conversation sessions
//!
//! The synchronous data model behind thinkchat's session memory:
//!
//! - [`Turn`] / [`Role`] - one message in a conversation
//! - [`Session`] - FIFO-bounded turn history, metadata, derived summary
//! - [`summarize`] - the deterministic summary rules
//!
//! Nothing in this crate is shared or locked; the owning service is
//! responsible for serializing access per session.

mod session;
mod summary;
mod turn;

pub use session::{DEFAULT_MAX_TURNS, Session, SessionError, USER_NAME_KEY};
pub use summary::{IDENTITY_MARKER, NO_KEY_INFORMATION, NO_SUMMARY_YET, identity, summarize};
pub use turn::{Role, Turn};

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
        // Sanity: after 2020-01-01
        assert!(a > 1_577_836_800_000);
    }
}
