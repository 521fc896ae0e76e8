//! Language-model provider implementations for CarePilot.
//!
//! All providers implement the `carepilot_core::Provider` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
