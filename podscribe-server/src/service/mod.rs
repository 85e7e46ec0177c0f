//! Service Module
//!
//! Business logic layer over the repositories. Every write to a job goes
//! through here so the status state machine is enforced in one place.

pub mod job;

pub use job as job_service;
