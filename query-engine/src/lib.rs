#![allow(clippy::missing_docs_in_private_items)]

//! Retrieval-augmented conversation engine: a provider tool loop over typed
//! search tools, streamed upward as discrete events.

pub mod engine;
pub mod events;
pub mod prompt;
pub mod tools;

pub use engine::QueryEngine;
pub use events::{QueryEvent, SourceRef};
