//! Build-environment resolution for farm submission.
//!
//! The farm manifest embeds a handful of build-system variables. Rather
//! than defaulting them by mutating the ambient process environment, the
//! submitter resolves an explicit [`FarmEnvironment`] once, at the strategy
//! boundary, from a caller-supplied lookup. Resolution never overwrites a
//! value that is already set, so resolving twice from the same source is
//! idempotent and the generated manifest is well-formed even outside CI.

/// Branch the build is running for.
pub const SOURCE_BRANCH: &str = "BUILD_SOURCEBRANCH";
/// Repository name.
pub const REPOSITORY: &str = "BUILD_REPOSITORY_NAME";
/// Team project owning the build definition.
pub const TEAM_PROJECT: &str = "SYSTEM_TEAMPROJECT";
/// Why the build was queued.
pub const BUILD_REASON: &str = "BUILD_REASON";
/// Human-facing build number.
pub const BUILD_NUMBER: &str = "BUILD_BUILDNUMBER";
/// Numeric build id, required to resolve the artifact payload in CI.
pub const BUILD_ID: &str = "BUILD_BUILDID";
/// Base URI of the build-system collection.
pub const COLLECTION_URI: &str = "SYSTEM_TEAMFOUNDATIONCOLLECTIONURI";
/// Access token; its presence is the CI-context detector.
pub const ACCESS_TOKEN: &str = "SYSTEM_ACCESSTOKEN";

/// Snapshot of the recognized build-environment inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FarmEnvironment {
    pub source_branch: String,
    pub repository: String,
    pub team_project: String,
    pub build_reason: String,
    pub build_number: String,
    pub build_id: Option<String>,
    pub collection_uri: Option<String>,
    pub access_token: Option<String>,
}

impl FarmEnvironment {
    /// Resolve the environment from a lookup function, filling defaults for
    /// any metadata value that is unset or empty. Values that are present
    /// are never overwritten.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let or_default = |name: &str, default: &str| {
            get(name).unwrap_or_else(|| default.to_string())
        };

        Self {
            source_branch: or_default(SOURCE_BRANCH, "local/run"),
            repository: or_default(REPOSITORY, "local/repository"),
            team_project: or_default(TEAM_PROJECT, "local"),
            build_reason: or_default(BUILD_REASON, "manual"),
            build_number: or_default(BUILD_NUMBER, "0"),
            build_id: get(BUILD_ID),
            collection_uri: get(COLLECTION_URI),
            access_token: get(ACCESS_TOKEN),
        }
    }

    /// Resolve from the process environment.
    pub fn from_process_env() -> Self {
        Self::resolve(|name| std::env::var(name).ok())
    }

    /// Whether the submitter is running under the expected CI context.
    pub fn ci_context(&self) -> bool {
        self.access_token.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn from_map(values: &HashMap<&str, &str>) -> FarmEnvironment {
        FarmEnvironment::resolve(|name| values.get(name).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_applied_when_unset() {
        let env = from_map(&HashMap::new());
        assert_eq!(env.source_branch, "local/run");
        assert_eq!(env.repository, "local/repository");
        assert_eq!(env.team_project, "local");
        assert_eq!(env.build_reason, "manual");
        assert_eq!(env.build_number, "0");
        assert!(env.build_id.is_none());
        assert!(!env.ci_context());
    }

    #[test]
    fn existing_values_are_never_overwritten() {
        let values = HashMap::from([
            (SOURCE_BRANCH, "refs/heads/main"),
            (REPOSITORY, "org/product"),
            (BUILD_NUMBER, "20260807.3"),
        ]);
        let env = from_map(&values);
        assert_eq!(env.source_branch, "refs/heads/main");
        assert_eq!(env.repository, "org/product");
        assert_eq!(env.build_number, "20260807.3");
        // Unset values still default.
        assert_eq!(env.build_reason, "manual");
    }

    #[test]
    fn resolution_is_idempotent() {
        let values = HashMap::from([(SOURCE_BRANCH, "refs/heads/release")]);
        let first = from_map(&values);
        let second = from_map(&values);
        assert_eq!(first, second);
    }

    #[test]
    fn access_token_presence_detects_ci() {
        let env = from_map(&HashMap::from([(ACCESS_TOKEN, "token")]));
        assert!(env.ci_context());
    }

    #[test]
    fn empty_values_count_as_unset() {
        let env = from_map(&HashMap::from([(BUILD_REASON, ""), (ACCESS_TOKEN, "")]));
        assert_eq!(env.build_reason, "manual");
        assert!(!env.ci_context());
    }
}
