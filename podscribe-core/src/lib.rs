//! Podscribe Core
//!
//! Core types shared by the Podscribe job execution layer.
//!
//! This crate contains:
//! - Domain types: jobs, progress snapshots, transcripts and speaker turns
//! - DTOs: request/response shapes for the job management interface

pub mod domain;
pub mod dto;
