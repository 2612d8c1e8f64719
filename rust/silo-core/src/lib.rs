#![warn(missing_docs)]

//! This crate embodies the canonical data model of the Silo secret
//! replication service.
//!
//! It includes:
//! - Typed identifiers and entity definitions for folders, secrets, secret
//!   versions, replicated imports and approval requests ([data])
//! - The replication error taxonomy ([error])
//! - Logging initialization helpers for binaries and tests ([tracing])
//!
//! Secret values never appear here in the clear: ciphertexts are opaque
//! [data::CipherText] triples that pass through replication verbatim.

pub mod data;
pub mod error;
pub mod tracing;
