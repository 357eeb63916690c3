//! Data model for test-assembly execution.
//!
//! These types carry no behavior beyond small accessors: an [`AssemblyInfo`]
//! describes one unit of work, a [`ProcessResult`] is the raw outcome of one
//! OS process, and a [`TestResult`] is the executor's verdict for one
//! assembly. The scheduler and the farm submitter both consume and produce
//! them without reinterpreting the executor's success flag.

use std::path::PathBuf;
use std::time::Duration;

/// One unit of work: a test assembly plus the metadata needed to invoke it.
///
/// The full input set is supplied once at the start of a run and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssemblyInfo {
    /// Path to the test assembly.
    pub assembly_path: PathBuf,

    /// Human-readable name used in reports and artifact file names.
    pub display_name: String,

    /// Partitioning arguments the executor appends to the command line
    /// (e.g. a class or partition filter). Empty for unpartitioned runs.
    pub extra_arguments: Vec<String>,
}

impl AssemblyInfo {
    pub fn new(assembly_path: impl Into<PathBuf>, display_name: impl Into<String>) -> Self {
        Self {
            assembly_path: assembly_path.into(),
            display_name: display_name.into(),
            extra_arguments: Vec::new(),
        }
    }

    /// Add partitioning arguments.
    pub fn with_extra_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_arguments.extend(args.into_iter().map(Into::into));
        self
    }

    /// Deterministic file stem for artifacts derived from this assembly
    /// (result files, failure logs). Characters that are unsafe in file
    /// names are replaced with underscores.
    pub fn file_stem(&self) -> String {
        self.display_name
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '-' | '.' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

/// Outcome of one underlying OS process invocation.
///
/// An executor may spawn more than one process per assembly (partitioned
/// execution), so a [`TestResult`] holds zero or more of these.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    /// Exit code (0 means success).
    pub exit_code: i32,

    /// Captured standard output, one entry per line.
    pub stdout_lines: Vec<String>,

    /// Captured standard error, one entry per line.
    pub stderr_lines: Vec<String>,
}

impl ProcessResult {
    /// Check if the process succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Outcome of running one [`AssemblyInfo`].
///
/// `succeeded` is whatever the executor reported; the scheduler never
/// recomputes it from the constituent process results.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// The assembly this result belongs to.
    pub assembly: AssemblyInfo,

    /// Whether every process the executor considered relevant succeeded.
    pub succeeded: bool,

    /// Wall-clock duration of the execution.
    pub elapsed: Duration,

    /// Free-form diagnostics text, printed after the run summary.
    pub diagnostics: String,

    /// The process invocations backing this result.
    pub process_results: Vec<ProcessResult>,

    /// Path to a rendered results file, when the executor produced one.
    pub results_file: Option<PathBuf>,
}
