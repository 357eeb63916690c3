//! Bounded scheduling of assembly executions.
//!
//! The [`Scheduler`] owns the run loop for the local strategy: it keeps at
//! most `max_parallel` executions in flight, harvests completed ones without
//! busy-waiting, isolates per-unit failures, and aggregates everything into
//! a [`RunAllResult`].
//!
//! # Loop shape
//!
//! Each iteration performs, in order: a cancellation check, a non-blocking
//! sweep of already-finished executions, a refill from the waiting pool up
//! to the concurrency bound, a one-line status update, and a single blocking
//! wait for the next completion. [`tokio::task::JoinSet`] provides both the
//! non-blocking sweep (`try_join_next`) and the wait-for-any primitive
//! (`join_next`), so the loop never spins and never misses work that
//! finished before the wait.
//!
//! # Failure isolation
//!
//! A unit that reports `succeeded == false` and a unit whose execution
//! faults (executor error or task panic) are both counted as failures and
//! surfaced inline; neither aborts the loop or the other in-flight units.
//! Only cancellation exits the loop early, and it does so by propagating
//! [`RunError::Cancelled`] without draining in-flight work — the aborted
//! tasks kill their child processes on drop.

use std::num::NonZeroUsize;
use std::sync::Arc;

use indicatif::ProgressBar;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{AssemblyExecutor, RunAllResult};
use crate::assembly::{AssemblyInfo, TestResult};

/// Errors that terminate a whole run.
///
/// Per-unit failures are not errors; they are folded into the
/// [`RunAllResult`]. The only way `run_all` fails is cancellation.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("test run cancelled before all assemblies completed")]
    Cancelled,
}

/// Concurrency bound for a run.
///
/// Sequential mode forces the bound to 1 (workloads such as UI-driving
/// integration tests must never run concurrently with themselves). Otherwise
/// the bound is `floor(available_parallelism * 1.5)`: most test workloads
/// are a mix of CPU and IO, so moderate over-subscription keeps cores busy.
pub fn concurrency_limit(sequential: bool) -> usize {
    if sequential {
        return 1;
    }
    let processors = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    (processors * 3 / 2).max(1)
}

/// Runs a set of assemblies with a bounded number in flight.
///
/// The scheduler exclusively owns its waiting/running/completed collections
/// for the duration of one [`run_all`](Self::run_all) call and retains
/// nothing afterwards; a fresh call starts from a clean slate.
pub struct Scheduler<E> {
    executor: Arc<E>,
    max_parallel: usize,
    progress: Option<ProgressBar>,
}

impl<E: AssemblyExecutor + 'static> Scheduler<E> {
    /// Creates a scheduler with the given concurrency bound.
    ///
    /// Values below 1 are clamped. Use [`concurrency_limit`] to derive the
    /// bound from the configured mode and the machine.
    pub fn new(executor: Arc<E>, max_parallel: usize) -> Self {
        Self {
            executor,
            max_parallel: max_parallel.max(1),
            progress: None,
        }
    }

    /// Attach a progress bar; the per-iteration status line is set as its
    /// message and inline failure output is routed through it so the two
    /// do not clobber each other.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run every assembly to completion and aggregate the results.
    ///
    /// Never fails for individual test failures or executor faults; those
    /// are isolated and counted. Fails only with [`RunError::Cancelled`]
    /// when the token fires before the run drains, in which case in-flight
    /// executions are aborted and no aggregate is produced.
    pub async fn run_all(
        &self,
        assemblies: Vec<AssemblyInfo>,
        cancel: CancellationToken,
    ) -> Result<RunAllResult, RunError> {
        debug!(
            "running {} assemblies, at most {} in flight",
            assemblies.len(),
            self.max_parallel
        );

        // Waiting pool drains last-in-first-out; completion order is not
        // guaranteed either way and the report re-sorts by elapsed time.
        let mut waiting = assemblies;
        let mut running: JoinSet<(AssemblyInfo, anyhow::Result<TestResult>)> = JoinSet::new();
        let mut completed: Vec<TestResult> = Vec::new();
        let mut failures = 0usize;

        while !waiting.is_empty() || !running.is_empty() {
            if cancel.is_cancelled() {
                if let Some(progress) = &self.progress {
                    progress.finish_and_clear();
                }
                // Dropping the JoinSet aborts in-flight executions; their
                // child processes are killed on drop by the executor.
                return Err(RunError::Cancelled);
            }

            // Harvest everything that finished since the last wait.
            while let Some(finished) = running.try_join_next() {
                self.harvest(finished, &mut completed, &mut failures);
            }

            while running.len() < self.max_parallel {
                let Some(assembly) = waiting.pop() else { break };
                let executor = Arc::clone(&self.executor);
                let token = cancel.clone();
                running.spawn(async move {
                    let outcome = executor.run(assembly.clone(), token).await;
                    (assembly, outcome)
                });
            }

            self.status(running.len(), waiting.len(), completed.len(), failures);

            // The single blocking point per iteration.
            if !running.is_empty() {
                if let Some(finished) = running.join_next().await {
                    self.harvest(finished, &mut completed, &mut failures);
                }
            }
        }

        if let Some(progress) = &self.progress {
            progress.finish_and_clear();
        }

        let process_results = completed
            .iter()
            .flat_map(|result| result.process_results.iter().cloned())
            .collect();

        Ok(RunAllResult {
            succeeded: failures == 0,
            test_results: completed,
            process_results,
        })
    }

    /// Fold one finished execution into the run state.
    ///
    /// A faulted execution (executor error or panicked task) increments the
    /// failure counter without producing a TestResult entry.
    fn harvest(
        &self,
        finished: Result<(AssemblyInfo, anyhow::Result<TestResult>), JoinError>,
        completed: &mut Vec<TestResult>,
        failures: &mut usize,
    ) {
        match finished {
            Ok((_, Ok(result))) => {
                if !result.succeeded {
                    *failures += 1;
                    self.emit_failure(&result);
                }
                completed.push(result);
            }
            Ok((assembly, Err(error))) => {
                *failures += 1;
                self.emit(&format!("ERROR {}: {error:#}", assembly.display_name));
            }
            Err(join_error) => {
                *failures += 1;
                self.emit(&format!("ERROR execution task failed: {join_error}"));
            }
        }
    }

    /// Emit the failing output for a completed-but-failed unit: the
    /// rendered results path when the executor provided one, otherwise every
    /// captured error line.
    fn emit_failure(&self, result: &TestResult) {
        self.emit(&format!("FAILED {}", result.assembly.display_name));
        if let Some(path) = &result.results_file {
            self.emit(&format!("  results: {}", path.display()));
        } else {
            for process in &result.process_results {
                for line in &process.stderr_lines {
                    self.emit(&format!("  {line}"));
                }
            }
        }
    }

    fn emit(&self, line: &str) {
        match &self.progress {
            Some(progress) => progress.println(line),
            None => println!("{line}"),
        }
    }

    fn status(&self, running: usize, queued: usize, completed: usize, failures: usize) {
        let mut line = format!("running {running}, queued {queued}, completed {completed}");
        if failures > 0 {
            line.push_str(&format!(", failures {failures}"));
        }
        match &self.progress {
            Some(progress) => progress.set_message(line),
            None => info!("{line}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::ProcessResult;
    use tokio_test::assert_ok;

    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    /// Executor stub with per-assembly delays and programmable outcomes.
    struct FakeExecutor {
        delays_ms: HashMap<String, u64>,
        failing: HashSet<String>,
        faulting: HashSet<String>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeExecutor {
        fn new() -> Self {
            Self {
                delays_ms: HashMap::new(),
                failing: HashSet::new(),
                faulting: HashSet::new(),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn delay(mut self, name: &str, millis: u64) -> Self {
            self.delays_ms.insert(name.to_string(), millis);
            self
        }

        fn failing(mut self, name: &str) -> Self {
            self.failing.insert(name.to_string());
            self
        }

        fn faulting(mut self, name: &str) -> Self {
            self.faulting.insert(name.to_string());
            self
        }

        fn max_seen(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AssemblyExecutor for FakeExecutor {
        async fn run(
            &self,
            assembly: AssemblyInfo,
            _cancel: CancellationToken,
        ) -> anyhow::Result<TestResult> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let millis = self
                .delays_ms
                .get(&assembly.display_name)
                .copied()
                .unwrap_or(5);
            tokio::time::sleep(Duration::from_millis(millis)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.faulting.contains(&assembly.display_name) {
                anyhow::bail!("executor crashed running {}", assembly.display_name);
            }

            let succeeded = !self.failing.contains(&assembly.display_name);
            Ok(TestResult {
                succeeded,
                elapsed: Duration::from_millis(millis),
                diagnostics: String::new(),
                process_results: vec![ProcessResult {
                    exit_code: if succeeded { 0 } else { 1 },
                    stdout_lines: vec![format!("ran {}", assembly.display_name)],
                    stderr_lines: if succeeded {
                        Vec::new()
                    } else {
                        vec![format!("{} assertion failed", assembly.display_name)]
                    },
                }],
                results_file: None,
                assembly,
            })
        }

        fn command_line_for(&self, assembly: &AssemblyInfo) -> String {
            format!("fake-runner {}", assembly.assembly_path.display())
        }
    }

    fn assemblies(names: &[&str]) -> Vec<AssemblyInfo> {
        names
            .iter()
            .map(|name| AssemblyInfo::new(format!("bin/{name}.dll"), *name))
            .collect()
    }

    #[test]
    fn concurrency_limit_sequential_is_one() {
        assert_eq!(concurrency_limit(true), 1);
    }

    #[test]
    fn concurrency_limit_parallel_is_at_least_one() {
        assert!(concurrency_limit(false) >= 1);
    }

    #[tokio::test]
    async fn sequential_never_overlaps_executions() {
        let executor = Arc::new(FakeExecutor::new());
        let scheduler = Scheduler::new(Arc::clone(&executor), 1);

        let result = assert_ok!(
            scheduler
                .run_all(assemblies(&["a", "b", "c", "d"]), CancellationToken::new())
                .await
        );

        assert_eq!(executor.max_seen(), 1);
        assert_eq!(result.test_results.len(), 4);
        assert!(result.succeeded);
    }

    #[tokio::test]
    async fn respects_concurrency_bound() {
        let mut executor = FakeExecutor::new();
        for name in ["a", "b", "c", "d", "e", "f"] {
            executor = executor.delay(name, 30);
        }
        let executor = Arc::new(executor);
        let scheduler = Scheduler::new(Arc::clone(&executor), 2);

        let result = scheduler
            .run_all(
                assemblies(&["a", "b", "c", "d", "e", "f"]),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(executor.max_seen() <= 2);
        assert_eq!(result.test_results.len(), 6);
    }

    #[tokio::test]
    async fn aggregates_failures_into_verdict() {
        let executor = Arc::new(FakeExecutor::new().failing("b"));
        let scheduler = Scheduler::new(executor, 3);

        let result = scheduler
            .run_all(assemblies(&["a", "b", "c"]), CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.succeeded);
        // A logical failure still yields a TestResult entry.
        assert_eq!(result.test_results.len(), 3);
        let failed: Vec<_> = result
            .test_results
            .iter()
            .filter(|r| !r.succeeded)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].assembly.display_name, "b");
    }

    #[tokio::test]
    async fn fault_is_isolated_from_other_units() {
        // 5 assemblies, bound of 2, four succeed with varying durations and
        // one faults: the fault is counted, produces no result entry, and
        // never prevents the queued units from running.
        let executor = Arc::new(
            FakeExecutor::new()
                .delay("one", 40)
                .delay("two", 10)
                .delay("three", 25)
                .delay("four", 5)
                .faulting("five"),
        );
        let scheduler = Scheduler::new(executor, 2);

        let result = scheduler
            .run_all(
                assemblies(&["one", "two", "three", "four", "five"]),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!result.succeeded);
        assert_eq!(result.test_results.len(), 4);
        assert!(
            result
                .test_results
                .iter()
                .all(|r| r.assembly.display_name != "five")
        );
        assert!(result.test_results.iter().all(|r| r.succeeded));
    }

    #[tokio::test]
    async fn cancelled_before_start_produces_no_result() {
        let executor = Arc::new(FakeExecutor::new());
        let scheduler = Scheduler::new(Arc::clone(&executor), 2);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = scheduler.run_all(assemblies(&["a", "b"]), cancel).await;
        assert!(matches!(outcome, Err(RunError::Cancelled)));
        assert_eq!(executor.max_seen(), 0);
    }

    #[tokio::test]
    async fn flattens_process_results_from_all_units() {
        let executor = Arc::new(FakeExecutor::new());
        let scheduler = Scheduler::new(executor, 4);

        let result = scheduler
            .run_all(assemblies(&["a", "b", "c"]), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.process_results.len(), 3);
    }

    #[tokio::test]
    async fn empty_input_succeeds_trivially() {
        let executor = Arc::new(FakeExecutor::new());
        let scheduler = Scheduler::new(executor, 4);

        let result = scheduler
            .run_all(Vec::new(), CancellationToken::new())
            .await
            .unwrap();

        assert!(result.succeeded);
        assert!(result.test_results.is_empty());
        assert!(result.process_results.is_empty());
    }
}
