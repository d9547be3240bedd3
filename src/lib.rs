//! `fdrelay`: pre-forked TCP echo server built on descriptor passing.
//!
//! A dispatcher accepts connections and transfers each accepted socket over
//! a Unix stream pair with `SCM_RIGHTS`. Every worker process holds a
//! duplicate of the same receiving end and races the others for each
//! handle; the kernel hands every message to exactly one of them. Each
//! worker then serves its connections from a single `poll(2)` loop.

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod loadgen;
pub mod logging;
pub mod supervisor;
pub mod transfer;
pub mod worker;

pub use config::RelayConfig;
pub use errors::{AppError, Result};
