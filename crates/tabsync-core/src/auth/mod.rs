//! Authentication state for a client context.
//!
//! This module provides `SessionCache`: the current identity (or its
//! absence) with a staleness window, single-flight refresh, and login/logout
//! that announce themselves to the other contexts of the origin.

pub mod session;

pub use session::{SessionCache, SessionSnapshot, SessionStatus, DEFAULT_STALE_MINUTES};
