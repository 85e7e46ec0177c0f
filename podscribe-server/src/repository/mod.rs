//! Repository Module
//!
//! Data access layer for the job store.

pub mod job;

pub use job as job_repository;
