//! Run-summary reporting and failure log artifacts.
//!
//! Pure formatting over a completed run: the aggregate is never mutated.
//! Output is organized so the scannable part comes first and the verbose
//! part last — failure detail, then one aligned line per result sorted by
//! elapsed time, then collected diagnostics.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use console::style;

use crate::assembly::TestResult;
use crate::executor::{AssemblyExecutor, RunAllResult};

/// Renders a completed run to the console and persists failure logs.
pub struct ConsoleReporter {
    log_dir: PathBuf,
}

impl ConsoleReporter {
    /// Creates a reporter writing failure logs under `log_dir`.
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    /// Print the run report.
    ///
    /// Results are ordered by elapsed duration ascending regardless of
    /// completion order. For every failed result the captured error output
    /// (preferring a rendered results file), the reconstructed command
    /// line, and the persisted log path are printed first; diagnostics are
    /// deliberately last so they land after the summary table.
    pub fn report(
        &self,
        run: &RunAllResult,
        executor: &dyn AssemblyExecutor,
    ) -> anyhow::Result<()> {
        let results = sorted_by_elapsed(&run.test_results);

        for result in results.iter().filter(|r| !r.succeeded) {
            println!();
            println!(
                "{}",
                style(format!("FAILED {}", result.assembly.display_name))
                    .red()
                    .bold()
            );
            match &result.results_file {
                Some(path) => println!("  results: {}", path.display()),
                None => {
                    for process in &result.process_results {
                        for line in &process.stderr_lines {
                            println!("  {line}");
                        }
                    }
                }
            }
            println!("  command: {}", executor.command_line_for(&result.assembly));
            let log_path = self.write_failure_log(result)?;
            println!("  log: {}", log_path.display());
        }

        println!();
        let width = results
            .iter()
            .map(|r| r.assembly.display_name.len())
            .max()
            .unwrap_or(0);
        for result in &results {
            let verdict = if result.succeeded {
                style("PASS").green()
            } else {
                style("FAIL").red()
            };
            let marker = if result.diagnostics.trim().is_empty() {
                ""
            } else {
                " *"
            };
            println!(
                "{:<width$}  {}  {}{}",
                result.assembly.display_name,
                verdict,
                format_elapsed(result.elapsed),
                marker,
            );
        }

        for result in results.iter().filter(|r| !r.diagnostics.trim().is_empty()) {
            println!();
            println!(
                "{}",
                style(format!("diagnostics: {}", result.assembly.display_name)).yellow()
            );
            println!("{}", result.diagnostics.trim_end());
        }

        println!();
        if run.succeeded {
            println!("{}", style("All test assemblies passed.").green().bold());
        } else {
            println!("{}", style("Some test assemblies failed.").red().bold());
        }

        Ok(())
    }

    /// Persist the raw standard output of a failed run for later
    /// inspection. The file name is derived deterministically from the
    /// assembly display name.
    fn write_failure_log(&self, result: &TestResult) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.log_dir).with_context(|| {
            format!("failed to create log directory {}", self.log_dir.display())
        })?;

        let path = self
            .log_dir
            .join(format!("{}.log", result.assembly.file_stem()));
        let mut contents = String::new();
        for process in &result.process_results {
            for line in &process.stdout_lines {
                contents.push_str(line);
                contents.push('\n');
            }
        }
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write log {}", path.display()))?;
        Ok(path)
    }
}

fn sorted_by_elapsed(results: &[TestResult]) -> Vec<TestResult> {
    let mut sorted = results.to_vec();
    sorted.sort_by_key(|result| result.elapsed);
    sorted
}

fn format_elapsed(elapsed: Duration) -> String {
    format!("{:>8.2}s", elapsed.as_secs_f64())
}
