//! The record-processing pipeline: retry decisions, commit bookkeeping,
//! dead-letter forwarding, and the poll/dispatch loop.

pub mod backoff;
pub mod commit;
pub mod consumer;
pub mod dead_letter;
pub mod dispatch;
