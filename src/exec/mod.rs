// src/exec/mod.rs

//! Executor layer.
//!
//! - [`backend`] provides the `ExecutorBackend` capability trait, the
//!   `ResultSink` backends report through, and the production
//!   `ProcessExecutor`.
//! - [`executor_loop`] owns the bounded worker loop behind `ProcessExecutor`.
//! - [`task_runner`] runs one task as a shell process.
//! - [`registry`] holds the label-keyed backends, routes tasks to them and
//!   merges their results.

pub mod backend;
pub mod executor_loop;
pub mod registry;
pub mod task_runner;

pub use backend::{
    BackendFailure, BackendOutput, ExecutorBackend, ProcessExecutor, ProcessExecutorOptions,
    ResultSink,
};
pub use executor_loop::spawn_executor;
pub use registry::{ExecutorInfo, ExecutorRegistry, to_task_result};
