//! Executor that runs one assembly as a local process.
//!
//! Each assembly is launched as a single child of the configured runner
//! program, with piped stdio and `kill_on_drop` so an aborted execution
//! never leaves an orphaned test process behind. Execution races against
//! the cancellation token and the configured timeout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::AssemblyExecutor;
use crate::assembly::{AssemblyInfo, ProcessResult, TestResult};
use crate::config::ExecutorConfig;

/// Runs assemblies via the configured runner program.
///
/// The command line for an assembly is
/// `program base_args... <assembly path> extra_arguments...`, plus a
/// `--results-file <path>` pair when a results directory is configured.
pub struct ProcessExecutor {
    config: ExecutorConfig,
}

impl ProcessExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn argv(&self, assembly: &AssemblyInfo) -> Vec<String> {
        let mut argv = Vec::with_capacity(4 + self.config.base_args.len());
        argv.push(self.config.program.clone());
        argv.extend(self.config.base_args.iter().cloned());
        argv.push(assembly.assembly_path.display().to_string());
        argv.extend(assembly.extra_arguments.iter().cloned());
        if let Some(path) = self.results_path(assembly) {
            argv.push("--results-file".to_string());
            argv.push(path.display().to_string());
        }
        argv
    }

    fn results_path(&self, assembly: &AssemblyInfo) -> Option<PathBuf> {
        self.config
            .results_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.xml", assembly.file_stem())))
    }
}

#[async_trait]
impl AssemblyExecutor for ProcessExecutor {
    async fn run(
        &self,
        assembly: AssemblyInfo,
        cancel: CancellationToken,
    ) -> anyhow::Result<TestResult> {
        let start = Instant::now();
        let argv = self.argv(&assembly);

        debug!("starting {}: {}", assembly.display_name, argv.join(" "));

        let mut command = tokio::process::Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = tokio::select! {
            _ = cancel.cancelled() => {
                anyhow::bail!("{} cancelled before completion", assembly.display_name);
            }
            finished = tokio::time::timeout(timeout, command.output()) => match finished {
                Ok(output) => output
                    .with_context(|| format!("failed to launch {}", argv[0]))?,
                Err(_) => anyhow::bail!(
                    "{} timed out after {}s",
                    assembly.display_name,
                    self.config.timeout_secs
                ),
            },
        };

        let elapsed = start.elapsed();
        let process_result = ProcessResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout_lines: capture_lines(&output.stdout),
            stderr_lines: capture_lines(&output.stderr),
        };
        let succeeded = process_result.success();

        debug!(
            "{} exited with {} in {:?}",
            assembly.display_name, process_result.exit_code, elapsed
        );

        // stderr from a passing run is worth surfacing after the summary;
        // on failure the lines stay on the ProcessResult where the
        // scheduler prints them inline.
        let diagnostics = if succeeded {
            process_result.stderr_lines.join("\n")
        } else {
            String::new()
        };

        let results_file = self.results_path(&assembly).filter(|path| path.exists());

        Ok(TestResult {
            succeeded,
            elapsed,
            diagnostics,
            process_results: vec![process_result],
            results_file,
            assembly,
        })
    }

    fn command_line_for(&self, assembly: &AssemblyInfo) -> String {
        shell_words::join(self.argv(assembly))
    }
}

fn capture_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_string)
        .collect()
}
