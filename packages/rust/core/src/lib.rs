//! Request coordination for KnowStream.
//!
//! This crate ties analysis, source fan-out, scoring, and synthesis into
//! the end-to-end `aggregate` operation: one query in, one typed event
//! stream out.

pub mod pipeline;

pub use pipeline::{AggregateOptions, Pipeline, RunSummary};
