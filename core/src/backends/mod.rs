//! Production transports for [`RemoteSession`](crate::session::RemoteSession).
//!
//! Gated behind the `ssh` cargo feature so the state machine, parsers and
//! scheduler can be built and tested without libssh2.

#[cfg(feature = "ssh")]
pub mod ssh;
