//! Core types, the diff engine, and trait definitions for the tally
//! social-graph auditor.
//!
//! This crate is deliberately free of database dependencies. The storage
//! backend implements [`store::AuditStore`]; everything else is pure.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod audit;
pub mod diff;
pub mod error;
pub mod identity;
pub mod projection;
pub mod snapshot;
pub mod store;
pub mod verification;
pub mod views;

pub use error::{DiffError, Error, Result, TransitionError};
