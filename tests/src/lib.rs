//! # Edgelink Test Suite
//!
//! Unified integration crate driving the SDK end to end over the
//! in-memory bus and the in-process state backend.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs            # Booted client + fake remote nodes
//! └── integration/
//!     ├── crypto_vectors.rs  # Sign/verify/hash/address invariants
//!     ├── ingress.rs         # Envelope drop, fleet filter, universe
//!     ├── supervisor_flow.rs # Directory refresh, online/offline edges
//!     └── request_flow.rs    # Command publish → notification settle
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p edgelink-tests
//! cargo test -p edgelink-tests integration::request_flow::
//! ```

#[cfg(test)]
pub mod fixtures;

#[cfg(test)]
mod integration;
