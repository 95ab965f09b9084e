pub mod client;
pub mod limiter;
pub mod provider;
pub mod retry;

pub use client::{LlmClient, LlmEvent, StreamFinish};
pub use provider::{Provider, RequestContext};
