//! Shared plumbing for the demo binaries in this crate.

pub mod common;
