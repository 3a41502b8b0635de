//! streamchat is a streaming chat client for generate-content style APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the conversation [`core::session::Session`], the line
//!   framing and object parsing of streamed replies, request dispatch with
//!   model rotation, history and credential persistence, and voice turns.
//! - [`api`] defines the request and response payloads exchanged with the
//!   provider.
//! - [`utils`] holds URL, auth header, and logging helpers.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`], which resolves configuration, builds a
//! session, and drives it until the requested turn completes.

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
