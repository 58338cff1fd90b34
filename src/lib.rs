//! Triage Pipeline: free-text message triage through independent stages.

pub mod config;
pub mod delivery;
pub mod error;
pub mod hub;
pub mod llm;
pub mod pipeline;
pub mod server;
pub mod store;
