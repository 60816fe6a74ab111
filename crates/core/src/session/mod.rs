//! Exclusive access to the single automation surface.
//!
//! The surface lives in a FIFO-fair async mutex. Acquiring it yields a
//! [`SessionHandle`]; dropping the handle releases the session. A session
//! flagged unhealthy is torn down and relaunched on the next acquire.

mod manager;
mod types;

pub use manager::{BrowserSessionManager, SessionHandle};
pub use types::{LibraryStatsError, SessionError, SessionState, SessionStatus};
