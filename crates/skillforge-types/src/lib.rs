//! Shared domain types for Skillforge.
//!
//! Workflow checkpoints, their status lifecycle, configuration and the
//! error taxonomy shared by every layer.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod checkpoint;
pub mod config;
pub mod error;
