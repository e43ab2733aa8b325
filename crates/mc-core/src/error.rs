//! # StoreError
//!
//! Centralized error handling for the marketcrawl crates. Implementations
//! surface these unmodified; retry and backoff belong to the caller.

use thiserror::Error;

/// The primary error type for all datastore operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Lookup or scheduling miss: unknown node id, or an empty frontier
    #[error("not found: {0}")]
    NotFound(String),

    /// A write step failed; the surrounding transaction was rolled back
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// The backing database could not be reached
    #[error("database unreachable: {0}")]
    Connectivity(String),
}

/// A specialized Result type for datastore operations.
pub type Result<T> = std::result::Result<T, StoreError>;
