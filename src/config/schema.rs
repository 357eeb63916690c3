//! Configuration schema definitions for barrage.
//!
//! All types deserialize from TOML via serde. The schema selects one of two
//! mutually exclusive execution strategies and declares the fixed assembly
//! set supplied to whichever strategy runs.
//!
//! # Schema overview
//!
//! ```text
//! Config (root)
//! ├── CoreConfig        - [barrage] strategy selection, sequential mode, log dir
//! ├── ExecutorConfig    - [executor] runner program, arguments, timeout
//! ├── FarmConfig        - [farm] manifest path, build invocation, payload
//! └── [[assemblies]]    - the unit-of-work descriptors
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::assembly::AssemblyInfo;

/// Root configuration structure.
///
/// # TOML structure
///
/// ```toml
/// [barrage]
/// sequential = false
/// strategy = "local"
///
/// [executor]
/// program = "dotnet"
/// base_args = ["exec", "testhost.dll"]
///
/// [[assemblies]]
/// path = "bin/Unit.Tests.dll"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Core settings (strategy, sequential mode, output directory).
    #[serde(default)]
    pub barrage: CoreConfig,

    /// How one assembly is turned into a runner invocation.
    pub executor: ExecutorConfig,

    /// Distributed-farm settings (optional, has defaults).
    #[serde(default)]
    pub farm: FarmConfig,

    /// The fixed set of assemblies to run.
    #[serde(default)]
    pub assemblies: Vec<AssemblyConfig>,
}

/// Which strategy executes the run. The two are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Run assemblies as local processes under the bounded scheduler.
    Local,
    /// Generate a job manifest and delegate execution to the test farm.
    Farm,
}

/// Core execution settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoreConfig {
    /// Force the concurrency bound to 1. Required for workloads that must
    /// never run concurrently with themselves (e.g. UI-driving tests).
    #[serde(default)]
    pub sequential: bool,

    /// Strategy selection. Default: local.
    #[serde(default = "default_strategy")]
    pub strategy: Strategy,

    /// Directory for per-failure log artifacts. Default: `test-logs`.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            sequential: false,
            strategy: default_strategy(),
            output_dir: default_output_dir(),
        }
    }
}

/// How the executor builds and bounds one runner process.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    /// The runner program (e.g. `dotnet`).
    pub program: String,

    /// Arguments placed before the assembly path on every invocation.
    #[serde(default)]
    pub base_args: Vec<String>,

    /// Timeout for one assembly's execution in seconds. Default: 900.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// When set, each invocation is asked to render a results file into
    /// this directory via `--results-file`, and the produced path is
    /// attached to the TestResult.
    pub results_dir: Option<PathBuf>,

    /// Working directory for runner processes. Default: current directory.
    pub working_dir: Option<PathBuf>,
}

/// Distributed-farm submission settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FarmConfig {
    /// Fixed path the generated job manifest is written to.
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,

    /// External build program invoked against the manifest.
    #[serde(default = "default_build_program")]
    pub build_program: String,

    /// Arguments for the build program; the manifest path is appended.
    #[serde(default = "default_build_args")]
    pub build_args: Vec<String>,

    /// Name of the build artifact every work item depends on.
    #[serde(default = "default_payload_name")]
    pub payload_name: String,

    /// Correlation-payload directory used outside a CI context.
    #[serde(default = "default_local_artifacts_dir")]
    pub local_artifacts_dir: PathBuf,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            manifest_path: default_manifest_path(),
            build_program: default_build_program(),
            build_args: default_build_args(),
            payload_name: default_payload_name(),
            local_artifacts_dir: default_local_artifacts_dir(),
        }
    }
}

/// One assembly descriptor as written in configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssemblyConfig {
    /// Path to the test assembly.
    pub path: PathBuf,

    /// Display name; defaults to the file stem of `path`.
    pub display_name: Option<String>,

    /// Extra partitioning arguments for the executor.
    #[serde(default)]
    pub extra_arguments: Vec<String>,
}

impl AssemblyConfig {
    /// Build the immutable unit-of-work descriptor.
    pub fn to_assembly_info(&self) -> AssemblyInfo {
        let display_name = self.display_name.clone().unwrap_or_else(|| {
            self.path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string())
        });
        AssemblyInfo::new(&self.path, display_name)
            .with_extra_arguments(self.extra_arguments.iter().cloned())
    }
}

fn default_strategy() -> Strategy {
    Strategy::Local
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("test-logs")
}

fn default_timeout_secs() -> u64 {
    900
}

fn default_manifest_path() -> PathBuf {
    PathBuf::from("farm-run.proj")
}

fn default_build_program() -> String {
    "dotnet".to_string()
}

fn default_build_args() -> Vec<String> {
    vec!["build".to_string()]
}

fn default_payload_name() -> String {
    "TestPayload".to_string()
}

fn default_local_artifacts_dir() -> PathBuf {
    PathBuf::from("artifacts")
}
