//! Helpers shared by unit tests that talk to a local mock server.

pub mod http1_only;
pub mod socket_guard;
