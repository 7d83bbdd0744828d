//! Projection implementations (read model builders).
//!
//! Projections consume published events and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: can be reconstructed from the event log
//! - **Idempotent**: safe for at-least-once delivery (per-stream cursors)
//! - **Strict**: unknown event kinds and sequence gaps are errors, never skipped

pub mod promissory_list;

pub use promissory_list::{ApplyOutcome, ProjectionError, PromissoryListProjection, PromissoryRow};
