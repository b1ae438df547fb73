// src/utils/mod.rs
//! Common utilities and helpers
//!
//! - **config**: Pipeline configuration loading and validation
//! - **errors**: Crate-wide error type
//! - **clock**: Injectable clock and monotonic-safe wall time

pub mod clock;
pub mod config;
pub mod errors;

pub use clock::{unix_nanos_now, Clock, TokioClock};
pub use config::PipelineConfig;
pub use errors::{PipelineError, Result};
