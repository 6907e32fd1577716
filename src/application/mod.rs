//! Application layer: runs the two-stage block pipeline.
//!
//! [`pipeline::PipelineOrchestrator`] is the entry point. It stamps every task
//! with a session key, emits download tasks on a [`scheduler::Scheduler`] and
//! races both queue stages against a [`deadline::Deadline`].

pub mod deadline;
pub mod pipeline;
pub mod query;
pub mod scheduler;
pub mod session;
