//! wmt-core - bookmark triage pipeline core.
//!
//! Selects one unprocessed bookmark from a Brave/Chromium inbox folder,
//! enriches it through an external reasoning CLI, stores the resulting
//! analysis, and records the outcome in a durable processing ledger.
//!
//! The ledger is the heart of the crate: it guarantees at-most-one active
//! worker per item across concurrent OS processes via a time-bounded lease,
//! and it records terminal outcomes exactly once. Everything else (bookmark
//! parsing, transcript retrieval, markdown publishing) is I/O glue around
//! that core.

pub mod bookmarks;
pub mod config;
pub mod enrich;
pub mod lease;
pub mod ledger;
pub mod output;
pub mod pipeline;
pub mod prompt;
pub mod publish;
pub mod selector;
pub mod stable;
pub mod urls;
pub mod youtube;
