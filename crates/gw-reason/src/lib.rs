//! Reasoning-provider abstraction for groundwork.
//!
//! This crate provides the seam between the setup pipeline and whatever
//! model answers its analysis, planning, and recovery prompts. It covers:
//! - A provider trait for plain prompt-in/text-out generation
//! - Structured (JSON) generation with a single corrective round-trip
//! - An HTTP implementation for OpenAI-compatible chat-completions servers
//! - A wall-clock timeout decorator
//! - Deterministic test doubles (stub and scripted providers)

pub mod provider;
