//! CLI client library. `main.rs` is a thin wrapper that parses arguments,
//! runs the sync step, and drives one session to completion.

pub mod config;
pub mod error;
pub mod session;
pub mod sync;
pub mod tls;
