//! mdexec - run untrusted Python snippets embedded in markdown documents
//!
//! This crate provides:
//! - Sandboxed execution service: hazard detection, safety rewrite,
//!   ephemeral artifacts and deadline-bounded child processes
//! - Extraction of runnable fenced blocks from markdown
//! - HTTP server for the document viewer
//!
//! The sandbox stops accidental hangs. It is not a security boundary.

pub mod cli;
pub mod config;
pub mod document;
pub mod paths;
pub mod sandbox;
pub mod server;

pub use config::Config;
