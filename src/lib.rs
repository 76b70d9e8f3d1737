//! repointel: repository intelligence pipeline
//!
//! Registers git repositories and drives each one through
//! `CREATED -> CLONED -> STRUCTURED -> INDEXED -> DOCS_GENERATED -> READY`
//! with durable jobs, then serves semantic search, generated documentation
//! and a tutor whose answers are grounded in cited code.

pub mod backend;
pub mod clone;
pub mod commands;
pub mod config;
pub mod docs;
pub mod embed;
pub mod error;
pub mod index;
pub mod jobs;
pub mod lifecycle;
pub mod llm;
pub mod meta;
pub mod progress;
pub mod rate_limit;
pub mod retry;
pub mod search;
pub mod structure;
pub mod tutor;
pub mod vector;
