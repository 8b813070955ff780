//! Session/execution server library. `main.rs` is a thin CLI wrapper around
//! the pieces exposed here; the `tests/` integration suite drives the same
//! entry points directly.

pub mod admission;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod process;
pub mod pump;
pub mod server;
pub mod session;
