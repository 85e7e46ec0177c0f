//! Data Transfer Objects
//!
//! Request and response shapes exchanged with callers of the job
//! management interface.

pub mod job;
