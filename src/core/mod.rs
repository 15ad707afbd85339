//! Core gateway logic
//!
//! Everything between the HTTP surface and the database lives here: the
//! OpenAI-compatible type system, the model catalog, the provider selection
//! engine, wire-dialect adapters, the family router, the request
//! orchestrator, and the accounting worker.

pub mod accounting;
pub mod adapters;
pub mod catalog;
pub mod family;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod selector;
pub mod types;
