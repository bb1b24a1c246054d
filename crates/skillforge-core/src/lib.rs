//! Checkpoint ports and resume logic for Skillforge.
//!
//! This crate defines the "ports" (repository and liveness traits) that the
//! infrastructure layer implements, plus the claim protocol, progress
//! tracking and recovery sweep built on top of them. It depends only on
//! `skillforge-types` -- never on `skillforge-infra` or any database crate.

pub mod checkpoint;
pub mod fingerprint;
pub mod liveness;
pub mod repository;
