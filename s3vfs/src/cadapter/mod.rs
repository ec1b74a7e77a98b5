//! Object store adapter (cAdapter)
//!
//! Submodules:
//! - `client`: the `ObjectBackend` trait every node talks to
//! - `s3`: S3-compatible adapter implementation
//! - `localfs`: directory-backed mock, one subdirectory per bucket
//! - `memory`: in-memory store with call counters for tests
//!
//! Responsibilities summary:
//! - Provide an async API for bucket/object listing, ranged get, put, copy and delete.
//! - Enforce the 1000-key bulk-delete limit at the seam.
//! - Keep transport-level retries inside the adapter; the node layer never retries.
pub mod client;
pub mod localfs;
pub mod memory;
pub mod s3;
