//! Promissory note domain module (event-sourced).
//!
//! Business rules for the promissory lifecycle, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod promissory;

pub use promissory::{
    AddGuarantor, CreatePromissory, GuarantorAdded, GuarantorCreated, MarkDone, Promissory,
    PromissoryCommand, PromissoryCreated, PromissoryDone, PromissoryEvent, PromissoryId,
    PromissoryState, AGGREGATE_TYPE,
};
