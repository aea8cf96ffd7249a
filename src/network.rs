//! SSH transport for the honeypot.
//!
//! - `network_listener`: accepts clients and owns the server identity.
//! - `ssh_handler`: per-connection russh handler feeding the session state machines.
//! - `upstream`: russh client used to reach the real backend for proxied sessions.

pub mod network_listener;
pub mod ssh_handler;
pub mod upstream;
