//! AI provider layer
//!
//! Streaming HTTP client for OpenAI-compatible `/chat/completions`
//! endpoints. Retries are deliberately not performed here; the agent layer
//! decides what to do with an upstream failure.

pub mod client;
pub mod sse;
pub mod types;

pub use client::{AiClient, ClientConfig, StreamPart};
pub use types::{ChatMessage, Role, Usage};
