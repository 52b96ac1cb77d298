//! # Persona Harness Core
//!
//! Pure logic for Persona Harness: decoding message bodies, normalizing
//! timestamps, segmenting conversations, formatting the retrieval corpus,
//! and assembling persona-constrained prompts.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. External
//! collaborators (the ranked-retrieval service and the task store) are
//! reached through the [`retrieval::RetrievalService`] and
//! [`tasks::TaskStore`] traits; in-memory implementations of both live here
//! for tests and embedding.
//!
//! ## Pipeline
//!
//! ```text
//! RawRecord ──▶ extract ──▶ segment ──▶ corpus ──▶ RetrievalService
//!              (decode,                               │
//!               timestamp)                            ▼
//!                               query ──▶ assemble ──▶ PromptRequest
//!                                          (persona, prompt, tasks)
//! ```

pub mod assemble;
pub mod corpus;
pub mod decode;
pub mod extract;
pub mod models;
pub mod persona;
pub mod prompt;
pub mod retrieval;
pub mod segment;
pub mod tasks;
pub mod timestamp;
