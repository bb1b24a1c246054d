//! Infrastructure layer for Skillforge.
//!
//! Contains implementations of the ports defined in `skillforge-core`:
//! SQLite checkpoint storage, SHA-256 input fingerprinting and the
//! configuration loader.

pub mod config;
pub mod crypto;
pub mod sqlite;
