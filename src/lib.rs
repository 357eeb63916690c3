//! barrage: a bounded parallel runner for test assemblies.
//!
//! Given a fixed set of test-assembly descriptors, barrage runs each one as
//! an external process with a bounded number in flight, isolates failures
//! so one bad assembly never aborts the batch, and aggregates everything
//! into a single verdict plus a human-readable report. A second, mutually
//! exclusive strategy skips local execution entirely and submits the same
//! assembly set to a distributed test farm as a generated job manifest.
//!
//! # Architecture
//!
//! - **assembly**: the data model (units of work, process and test results)
//! - **executor**: the executor seam, the process executor, and the bounded
//!   scheduler that owns the run loop
//! - **farm**: environment resolution, manifest generation, and submission
//!   for the distributed strategy
//! - **report**: run summary and failure log artifacts
//! - **config**: TOML configuration and schema

pub mod assembly;
pub mod config;
pub mod executor;
pub mod farm;
pub mod report;

// Re-export commonly used types
pub use assembly::{AssemblyInfo, ProcessResult, TestResult};
pub use config::{Config, Strategy, load_config};
pub use executor::{AssemblyExecutor, ProcessExecutor, RunAllResult, RunError, Scheduler};
pub use farm::FarmSubmitter;
pub use report::ConsoleReporter;
