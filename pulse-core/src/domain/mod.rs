//! Core domain types
//!
//! Records reported by the CI provider and the identities used to address
//! them. Shared by the client (deserialization, caching) and the daemon
//! (metric collection).

pub mod agent;
pub mod build;
pub mod job;
pub mod pipeline;

pub use agent::Agent;
pub use build::Build;
pub use job::{Job, JobAgent};
pub use pipeline::{PipelineId, PipelineRef};
