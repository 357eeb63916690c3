//! Test execution: the executor seam and the bounded scheduler.
//!
//! This module contains the contract between the run loop and whatever
//! actually launches a test process, plus the aggregate result type for a
//! whole run.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Scheduler                          │
//! │  (bounded run loop: sweep / refill / block-on-any)       │
//! │                          │                               │
//! │                          ▼ run(assembly, cancel)         │
//! │              ┌──────────────────────────┐                │
//! │              │     AssemblyExecutor     │                │
//! │              │  (ProcessExecutor, ...)  │                │
//! │              └──────────────────────────┘                │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The scheduler treats the executor as opaque: it may retry or partition
//! internally, and the `succeeded` flag it reports is taken at face value.
//! The farm strategy reuses the same seam through
//! [`command_line_for`](AssemblyExecutor::command_line_for) to embed
//! reproducible commands in its manifest.

pub mod process;
pub mod scheduler;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::assembly::{AssemblyInfo, ProcessResult, TestResult};

pub use process::ProcessExecutor;
pub use scheduler::{RunError, Scheduler, concurrency_limit};

/// Collaborator that runs one assembly and yields its [`TestResult`].
///
/// `run` is awaited (or harvested later) by the scheduler; an `Err` from it
/// is a per-unit fault that is isolated, counted, and never aborts the run.
/// `command_line_for` must return the exact invocation `run` would perform,
/// so the reporter and the farm manifest can reproduce it.
#[async_trait]
pub trait AssemblyExecutor: Send + Sync {
    /// Execute one assembly to completion, honoring the cancellation token.
    async fn run(
        &self,
        assembly: AssemblyInfo,
        cancel: CancellationToken,
    ) -> anyhow::Result<TestResult>;

    /// The fully-formed command line that would run this assembly.
    fn command_line_for(&self, assembly: &AssemblyInfo) -> String;
}

/// Aggregated results of an entire run.
///
/// Invariants upheld by both strategies:
/// - `succeeded` is true iff the run had zero failures (logical or faulted);
/// - `test_results` holds exactly one entry per dispatched unit that did not
///   fault — a unit whose execution faulted is counted as a failure but has
///   no entry here;
/// - `process_results` is the flattened set of all process invocations
///   behind `test_results` (the farm strategy contributes the single build
///   invocation instead).
#[derive(Debug, Clone)]
pub struct RunAllResult {
    /// `true` iff no unit failed and no unit faulted.
    pub succeeded: bool,

    /// Per-assembly results for every unit that completed.
    pub test_results: Vec<TestResult>,

    /// Every process invocation observed during the run.
    pub process_results: Vec<ProcessResult>,
}

impl RunAllResult {
    /// Conventional process exit code for this result: 0 when the run
    /// succeeded, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.succeeded { 0 } else { 1 }
    }
}
