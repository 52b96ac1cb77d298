//! # Persona Harness
//!
//! Turns a message-store export into a retrieval corpus and uses it to build
//! persona-constrained prompts for a text generator.
//!
//! The pure pipeline (decoding, segmentation, corpus formatting, prompt
//! assembly, task selection) lives in [`persona_harness_core`]. This crate
//! adds everything that touches the outside world: configuration, the
//! source store, the SQLite corpus, embedding and generation APIs, the task
//! file and chat transcripts.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ Source store │──▶│   extract    │──▶│ messages.json │
//! │  (message)   │   │ decode + ts  │   └───────┬───────┘
//! └──────────────┘   └──────────────┘           │
//!                                               ▼
//!                    ┌──────────────┐   ┌───────────────┐
//!                    │    index     │──▶│    SQLite     │
//!                    │ segment+docs │   │  FTS5 + vec   │
//!                    └──────────────┘   └───────┬───────┘
//!                                               │
//!                          ┌────────────────────┤
//!                          ▼                    ▼
//!                    ┌──────────┐         ┌──────────┐
//!                    │  prompt  │         │   ask    │──▶ generator
//!                    └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! persona init                   # create corpus database
//! persona extract                # read the message store
//! persona index                  # segment and index conversations
//! persona ask "what's for dinner?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connections |
//! | [`migrate`] | Corpus schema |
//! | [`extract`] | Source-store extraction |
//! | [`ingest`] | Corpus indexing |
//! | [`sqlite_store`] | SQLite retrieval service |
//! | [`embedding`] | Embedding providers |
//! | [`search`] | Ranked search command |
//! | [`generation`] | Generation client |
//! | [`retry`] | Backoff for HTTP calls |
//! | [`tasks`] | JSON task store |
//! | [`transcript`] | Chat transcripts |
//! | [`chat`] | Prompt and ask commands |
//! | [`stats`] | Corpus statistics |

pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod migrate;
pub mod retry;
pub mod search;
pub mod sqlite_store;
pub mod stats;
pub mod tasks;
pub mod transcript;
