//! Workflow engine for groundwork's automated environment setup.
//!
//! This crate owns the pipeline that takes a project directory from a cold
//! checkout to a verified development environment. It covers:
//! - The stage graph (orchestrate, scan, analyze, plan, verify, report) and
//!   the conditional routing between stages
//! - A per-language execution queue with pluggable handlers
//! - A step runner with timeouts, an approval gate, and one-shot recovery
//! - Command-risk classification and the interactive approval protocol
//! - Shell spawning with terminate-then-kill timeout handling

pub mod approval;
pub mod graph;
pub mod handlers;
pub mod queue;
pub mod runner;
pub mod safety;
pub mod shell;
pub mod stages;
pub mod state;

// Re-export the surface a caller needs to drive a run.
pub use approval::{ApprovalPrompt, ApprovalResponse, StdinPrompt};
pub use graph::{route_after, EngineError, StageId, WorkflowEngine};
pub use shell::{CommandSpawner, TokioSpawner};
pub use state::{RunState, WorkflowPath};
