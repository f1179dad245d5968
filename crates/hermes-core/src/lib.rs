//! # Hermes core
//!
//! Shared, dependency-light logic for Hermes: composite document identity,
//! the project/provider model and its migration state machine, the
//! workspace capability interfaces, document/revision/embedding value
//! types, the error taxonomy, and the pure hybrid-search fusion
//! algorithm.
//!
//! This crate has no tokio, sqlx, or network dependency — everything here
//! is synchronous value logic or trait definitions, so it's the fastest
//! place to run the bulk of the test suite and the thing both an Edge and
//! a Central process link against.

pub mod capability;
pub mod document;
pub mod error;
pub mod identity;
pub mod project;
pub mod search;
