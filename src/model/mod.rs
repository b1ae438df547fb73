// src/model/mod.rs
//! Log record and batch model
//!
//! - **Record**: one normalized log event, moved into the pipeline on submit
//! - **Resource / Scope**: process-wide identity shared by reference
//! - **Batch**: sealed, immutable group of records handed to the encoder
//!
//! # Ownership
//!
//! ```text
//! producer ──move──▶ ring buffer ──move──▶ BatchBuilder ──seal──▶ Batch
//!                                                                  │
//!                                           Arc<Resource> ◀────────┘ (shared, never copied)
//! ```

pub mod batch;
pub mod record;
pub mod resource;

pub use batch::{Batch, BatchBuilder};
pub use record::{AttributeValue, Record, Severity, TraceContext, MAX_ATTRIBUTE_DEPTH};
pub use resource::{Resource, Scope};
