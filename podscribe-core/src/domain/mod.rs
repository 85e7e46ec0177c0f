//! Core domain types
//!
//! This module contains the domain structures used across Podscribe crates.
//! Jobs are persisted by the server, progress events are broadcast to
//! listeners, and transcripts are produced by the capability layer.

pub mod job;
pub mod progress;
pub mod transcript;
