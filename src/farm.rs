//! Distributed test-farm submission.
//!
//! The farm strategy does not run any test process itself. It resolves the
//! build environment once, determines the correlation payload every remote
//! work item depends on, renders a job manifest with one work item per
//! assembly, and hands execution to an external build invocation. The only
//! observable outcome is that invocation's exit code and captured output,
//! wrapped as the sole entry of the aggregate — per-assembly results are
//! not surfaced in this mode.

pub mod env;
pub mod manifest;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::assembly::{AssemblyInfo, ProcessResult};
use crate::config::FarmConfig;
use crate::executor::scheduler::RunError;
use crate::executor::{AssemblyExecutor, RunAllResult};

pub use env::FarmEnvironment;

/// Errors that make farm submission impossible before it starts.
///
/// These are configuration preconditions, surfaced immediately and never
/// retried.
#[derive(Debug, thiserror::Error)]
pub enum FarmError {
    #[error("{0} must be set in a CI context")]
    MissingVariable(&'static str),

    #[error("build id {0:?} is not numeric")]
    InvalidBuildId(String),

    #[error("artifact lookup failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("artifact metadata was malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Reference to the artifact bundle every remote work item depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationPayload {
    /// Download URL resolved from the build-artifact endpoint (CI context).
    Uri(String),
    /// Fixed local artifacts directory (outside CI).
    Directory(PathBuf),
}

impl CorrelationPayload {
    /// Location string embedded in the manifest.
    pub fn location(&self) -> String {
        match self {
            Self::Uri(uri) => uri.clone(),
            Self::Directory(path) => path.display().to_string(),
        }
    }
}

/// Shape of the build-artifact metadata response; only the nested download
/// URL is consumed.
#[derive(Debug, Deserialize)]
struct ArtifactMetadata {
    resource: ArtifactResource,
}

#[derive(Debug, Deserialize)]
struct ArtifactResource {
    #[serde(rename = "downloadUrl")]
    download_url: String,
}

/// Submits a run to the distributed test farm.
pub struct FarmSubmitter<E> {
    config: FarmConfig,
    executor: Arc<E>,
    client: reqwest::Client,
}

impl<E: AssemblyExecutor + 'static> FarmSubmitter<E> {
    pub fn new(config: FarmConfig, executor: Arc<E>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            executor,
            client,
        })
    }

    /// Generate the manifest and delegate execution to the external build
    /// invocation.
    ///
    /// Succeeds iff the build invocation exits zero; its single
    /// [`ProcessResult`] is the whole aggregate. A non-zero exit is one
    /// aggregate failure with no attribution to individual assemblies.
    pub async fn run_all(
        &self,
        assemblies: &[AssemblyInfo],
        cancel: CancellationToken,
    ) -> anyhow::Result<RunAllResult> {
        let environment = FarmEnvironment::from_process_env();
        let payload = self.resolve_correlation_payload(&environment).await?;

        debug!("correlation payload: {}", payload.location());

        let document = manifest::render(assemblies, self.executor.as_ref(), &environment, &payload)?;
        tokio::fs::write(&self.config.manifest_path, &document)
            .await
            .with_context(|| {
                format!(
                    "failed to write manifest to {}",
                    self.config.manifest_path.display()
                )
            })?;

        info!(
            "submitting {} work items via {}",
            assemblies.len(),
            self.config.manifest_path.display()
        );

        let mut command = tokio::process::Command::new(&self.config.build_program);
        command
            .args(&self.config.build_args)
            .arg(&self.config.manifest_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(RunError::Cancelled.into()),
            output = command.output() => output.with_context(|| {
                format!("failed to launch {}", self.config.build_program)
            })?,
        };

        let process_result = ProcessResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout_lines: capture_lines(&output.stdout),
            stderr_lines: capture_lines(&output.stderr),
        };
        let succeeded = process_result.success();

        Ok(RunAllResult {
            succeeded,
            test_results: Vec::new(),
            process_results: vec![process_result],
        })
    }

    /// Determine the payload reference for this run.
    ///
    /// Under the CI context the build id is a hard precondition: it must be
    /// present and numeric so the artifact endpoint can be queried for the
    /// payload's download URL. Outside CI the payload points at the fixed
    /// local artifacts directory.
    pub async fn resolve_correlation_payload(
        &self,
        environment: &FarmEnvironment,
    ) -> Result<CorrelationPayload, FarmError> {
        if !environment.ci_context() {
            return Ok(CorrelationPayload::Directory(
                self.config.local_artifacts_dir.clone(),
            ));
        }

        let raw_id = environment
            .build_id
            .as_deref()
            .ok_or(FarmError::MissingVariable(env::BUILD_ID))?;
        let build_id: u64 = raw_id
            .parse()
            .map_err(|_| FarmError::InvalidBuildId(raw_id.to_string()))?;
        let collection = environment
            .collection_uri
            .as_deref()
            .ok_or(FarmError::MissingVariable(env::COLLECTION_URI))?;

        let url = format!(
            "{}/{}/_apis/build/builds/{}/artifacts?artifactName={}&api-version=7.1",
            collection.trim_end_matches('/'),
            environment.team_project,
            build_id,
            self.config.payload_name,
        );

        debug!("resolving correlation payload from {url}");

        let mut request = self.client.get(&url);
        if let Some(token) = &environment.access_token {
            request = request.bearer_auth(token);
        }
        let body = request.send().await?.error_for_status()?.text().await?;
        let metadata: ArtifactMetadata = serde_json::from_str(&body)?;

        Ok(CorrelationPayload::Uri(metadata.resource.download_url))
    }
}

fn capture_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::TestResult;
    use crate::config::FarmConfig;

    use async_trait::async_trait;

    struct StubExecutor;

    #[async_trait]
    impl AssemblyExecutor for StubExecutor {
        async fn run(
            &self,
            _assembly: AssemblyInfo,
            _cancel: CancellationToken,
        ) -> anyhow::Result<TestResult> {
            anyhow::bail!("farm submission never executes assemblies locally")
        }

        fn command_line_for(&self, assembly: &AssemblyInfo) -> String {
            format!("runner {}", assembly.assembly_path.display())
        }
    }

    fn submitter() -> FarmSubmitter<StubExecutor> {
        FarmSubmitter::new(FarmConfig::default(), Arc::new(StubExecutor)).unwrap()
    }

    fn environment_with(values: &[(&str, &str)]) -> FarmEnvironment {
        FarmEnvironment::resolve(|name| {
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        })
    }

    #[tokio::test]
    async fn payload_is_local_directory_outside_ci() {
        let payload = submitter()
            .resolve_correlation_payload(&environment_with(&[]))
            .await
            .unwrap();

        assert_eq!(
            payload,
            CorrelationPayload::Directory(PathBuf::from("artifacts"))
        );
    }

    #[tokio::test]
    async fn missing_build_id_is_fatal_in_ci() {
        let environment = environment_with(&[(env::ACCESS_TOKEN, "token")]);

        let error = submitter()
            .resolve_correlation_payload(&environment)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            FarmError::MissingVariable(name) if name == env::BUILD_ID
        ));
    }

    #[tokio::test]
    async fn non_numeric_build_id_is_fatal_in_ci() {
        let environment = environment_with(&[
            (env::ACCESS_TOKEN, "token"),
            (env::BUILD_ID, "twelve"),
        ]);

        let error = submitter()
            .resolve_correlation_payload(&environment)
            .await
            .unwrap_err();

        assert!(matches!(error, FarmError::InvalidBuildId(ref id) if id == "twelve"));
    }

    #[tokio::test]
    async fn missing_collection_uri_is_fatal_in_ci() {
        let environment = environment_with(&[
            (env::ACCESS_TOKEN, "token"),
            (env::BUILD_ID, "12345"),
        ]);

        let error = submitter()
            .resolve_correlation_payload(&environment)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            FarmError::MissingVariable(name) if name == env::COLLECTION_URI
        ));
    }
}
