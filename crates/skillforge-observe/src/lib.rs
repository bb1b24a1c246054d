//! Observability setup for Skillforge.
//!
//! The tracing subscriber is process-wide state. The binary constructs it
//! exactly once through [`tracing_setup::init_tracing`] and keeps the
//! returned guard alive until exit.

pub mod tracing_setup;
