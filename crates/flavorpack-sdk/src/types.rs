//! Core types for flavorpack-sdk.
//!
//! This module defines the fundamental types used throughout the SDK:
//!
//! - [`PackError`] - Error type for every packing operation
//! - [`BuildType`] - Build configuration category (debug, release or custom)
//! - [`BuildVariant`] - One concrete flavor × build type combination
//! - [`PackerOptions`] - The resolved packer configuration surface

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Error types for flavorpack-sdk operations.
///
/// Configuration errors ([`PackError::Config`], [`PackError::UnknownVariable`])
/// are fatal for a whole run. The remaining variants are raised by a single
/// variant's step and are recorded on that variant's report by the
/// orchestrator.
///
/// # Example
///
/// ```
/// use flavorpack_sdk::naming::NameTemplate;
/// use flavorpack_sdk::PackError;
///
/// match NameTemplate::parse("${appPkg}-${channel}") {
///     Err(PackError::UnknownVariable(name)) => assert_eq!(name, "channel"),
///     other => panic!("unexpected: {:?}", other),
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    /// An I/O error occurred.
    ///
    /// Common causes include missing files, permission issues, or
    /// disk space problems while writing manifests or archives.
    #[error("I/O error: {0}. Check file paths and permissions")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}. Check JSON validity")]
    Serialization(#[from] serde_json::Error),

    /// A configuration error occurred.
    ///
    /// This indicates invalid or missing configuration, such as an
    /// unsupported descriptor format or a malformed name template.
    #[error("configuration error: {0}. Check flavorpack.toml or CLI flags")]
    Config(String),

    /// The name template references a variable outside the supported set.
    #[error(
        "unknown template variable '${{{0}}}'. Supported variables: appName, projectName, \
         flavorName, buildType, versionName, versionCode, appPkg, buildTime"
    )]
    UnknownVariable(String),

    /// The name template references a supported variable that has no value
    /// for this variant.
    #[error("template variable '${{{0}}}' has no value for this variant")]
    MissingVariable(String),

    /// The manifest could not be parsed or does not have the expected shape.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// The build-number store could not be read or persisted.
    #[error("build number store error: {0}")]
    CounterStore(String),

    /// Copying an artifact into the archive directory failed.
    #[error("archive error: {0}")]
    Archive(String),
}

/// Build configuration category of a variant.
///
/// Only `debug` has special meaning: debug variants are never touched by the
/// packer. Any other name is carried through unchanged.
///
/// # Example
///
/// ```
/// use flavorpack_sdk::BuildType;
///
/// let debug = BuildType::from_name("debug");
/// assert!(debug.is_debug());
/// assert_eq!(BuildType::from_name("staging").as_str(), "staging");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BuildType {
    /// Debuggable development build.
    Debug,
    /// Optimized, signed release build.
    Release,
    /// Any other build type declared by the project.
    Custom(String),
}

impl BuildType {
    /// Maps a build type name onto its variant.
    pub fn from_name(name: &str) -> Self {
        match name {
            "debug" => BuildType::Debug,
            "release" => BuildType::Release,
            other => BuildType::Custom(other.to_string()),
        }
    }

    /// Returns the build type name as declared by the project.
    pub fn as_str(&self) -> &str {
        match self {
            BuildType::Debug => "debug",
            BuildType::Release => "release",
            BuildType::Custom(name) => name,
        }
    }

    /// Returns `true` for the `debug` build type.
    pub fn is_debug(&self) -> bool {
        matches!(self, BuildType::Debug)
    }
}

impl From<String> for BuildType {
    fn from(name: String) -> Self {
        BuildType::from_name(&name)
    }
}

impl From<BuildType> for String {
    fn from(build_type: BuildType) -> Self {
        build_type.as_str().to_string()
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete build combination of flavor × build type.
///
/// Variants are constructed by the host build system (here: the project
/// descriptor) before the packer runs. The packer only ever mutates
/// `version_name`, at most once per orchestration pass.
///
/// # Example
///
/// ```
/// use flavorpack_sdk::{BuildType, BuildVariant};
///
/// let variant = BuildVariant::new("google", BuildType::Release, "1.2", 7, "com.example.app");
/// assert_eq!(variant.name, "googleRelease");
/// assert!(!variant.is_debug());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildVariant {
    /// Unique composite id (e.g. `googleRelease`).
    #[serde(default)]
    pub name: String,
    /// Flavor name; empty when the project declares no flavors.
    #[serde(default)]
    pub flavor_name: String,
    pub build_type: BuildType,
    pub version_name: String,
    pub version_code: u32,
    pub application_id: String,
    /// Whether the build type carries a signing configuration.
    #[serde(default)]
    pub signing_config: bool,
    /// Whether zip-alignment is enabled for the build type.
    #[serde(default)]
    pub zip_align: bool,
    /// Merged manifest for this variant, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    /// Built artifact for this variant, if the build produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl BuildVariant {
    /// Creates a signed, zip-aligned variant without manifest or output paths.
    pub fn new(
        flavor_name: impl Into<String>,
        build_type: BuildType,
        version_name: impl Into<String>,
        version_code: u32,
        application_id: impl Into<String>,
    ) -> Self {
        let flavor_name = flavor_name.into();
        Self {
            name: variant_name(&flavor_name, &build_type),
            flavor_name,
            build_type,
            version_name: version_name.into(),
            version_code,
            application_id: application_id.into(),
            signing_config: true,
            zip_align: true,
            manifest: None,
            output: None,
        }
    }

    /// Returns `true` when the build type is `debug`.
    pub fn is_debug(&self) -> bool {
        self.build_type.is_debug()
    }

    /// Returns `true` when the variant belongs to a flavor.
    pub fn has_flavor(&self) -> bool {
        !self.flavor_name.is_empty()
    }

    /// Fills in the composite name when the descriptor left it out.
    pub fn ensure_name(&mut self) {
        if self.name.is_empty() {
            self.name = variant_name(&self.flavor_name, &self.build_type);
        }
    }
}

/// Builds the composite variant name: `flavor` + capitalized build type.
///
/// ```
/// use flavorpack_sdk::{BuildType, types::variant_name};
///
/// assert_eq!(variant_name("baidu", &BuildType::Release), "baiduRelease");
/// assert_eq!(variant_name("", &BuildType::Release), "release");
/// ```
pub fn variant_name(flavor_name: &str, build_type: &BuildType) -> String {
    if flavor_name.is_empty() {
        return build_type.as_str().to_string();
    }
    let mut chars = build_type.as_str().chars();
    let capitalized: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    format!("{}{}", flavor_name, capitalized)
}

/// Default archive name template.
pub const DEFAULT_NAME_TEMPLATE: &str =
    "${appPkg}-${flavorName}-${buildType}-v${versionName}-${versionCode}";

/// Resolved packer configuration.
///
/// Host properties (`output`, `market`, `buildNum`) and extension options
/// (`archiveOutput`, `archiveNameFormat`, `manifestMatcher`,
/// `buildNumberAuto`, `buildNumberTypeMatcher`) collapse into one struct
/// once the CLI has merged flags, config file and defaults.
///
/// # Example
///
/// ```
/// use flavorpack_sdk::PackerOptions;
/// use std::path::PathBuf;
///
/// let options = PackerOptions {
///     archive_output: PathBuf::from("build/archives"),
///     build_number_auto: true,
///     ..PackerOptions::default()
/// };
/// assert!(options.build_type_allowed("release"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackerOptions {
    /// Directory the archives are copied into. Emptied before copying.
    pub archive_output: PathBuf,
    /// Archive name template; [`DEFAULT_NAME_TEMPLATE`] when unset.
    pub archive_name_format: Option<String>,
    /// Metadata names to stamp with the flavor name. Exact match, in order.
    pub manifest_matcher: Vec<String>,
    /// Append an auto-incremented build number when no markets exist.
    pub build_number_auto: bool,
    /// Build types eligible for auto-increment; `None` means all types.
    pub build_number_type_matcher: Option<BTreeSet<String>>,
    /// Market list file.
    pub market_file: Option<PathBuf>,
    /// Explicit build number, appended literally instead of auto-increment.
    pub build_num: Option<String>,
    /// Compute everything but do not write manifests or archives.
    pub dry_run: bool,
}

impl Default for PackerOptions {
    fn default() -> Self {
        Self {
            archive_output: PathBuf::from("build/archives"),
            archive_name_format: None,
            manifest_matcher: Vec::new(),
            build_number_auto: false,
            build_number_type_matcher: None,
            market_file: None,
            build_num: None,
            dry_run: false,
        }
    }
}

impl PackerOptions {
    /// Returns the archive name template in effect.
    pub fn name_template(&self) -> &str {
        self.archive_name_format
            .as_deref()
            .unwrap_or(DEFAULT_NAME_TEMPLATE)
    }

    /// Returns `true` if `build_type` may receive an auto-incremented build number.
    pub fn build_type_allowed(&self, build_type: &str) -> bool {
        self.build_number_type_matcher
            .as_ref()
            .is_none_or(|allowed| allowed.contains(build_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_type_roundtrips_through_name() {
        for name in ["debug", "release", "beta"] {
            assert_eq!(BuildType::from_name(name).as_str(), name);
        }
        assert_eq!(
            BuildType::from_name("beta"),
            BuildType::Custom("beta".to_string())
        );
    }

    #[test]
    fn test_variant_name_capitalizes_build_type() {
        assert_eq!(variant_name("google", &BuildType::Debug), "googleDebug");
        assert_eq!(
            variant_name("google", &BuildType::Custom("staging".into())),
            "googleStaging"
        );
    }

    #[test]
    fn test_ensure_name_keeps_explicit_name() {
        let mut variant = BuildVariant::new("google", BuildType::Release, "1.0", 1, "com.x");
        variant.name = "custom".into();
        variant.ensure_name();
        assert_eq!(variant.name, "custom");

        variant.name.clear();
        variant.ensure_name();
        assert_eq!(variant.name, "googleRelease");
    }

    #[test]
    fn test_type_matcher_unset_allows_everything() {
        let options = PackerOptions::default();
        assert!(options.build_type_allowed("release"));
        assert!(options.build_type_allowed("beta"));
    }

    #[test]
    fn test_type_matcher_restricts_types() {
        let options = PackerOptions {
            build_number_type_matcher: Some(["release".to_string()].into_iter().collect()),
            ..PackerOptions::default()
        };
        assert!(options.build_type_allowed("release"));
        assert!(!options.build_type_allowed("beta"));
    }

    #[test]
    fn test_default_template() {
        assert_eq!(PackerOptions::default().name_template(), DEFAULT_NAME_TEMPLATE);
    }

    #[test]
    fn test_build_variant_deserializes_build_type_from_string() {
        let json = r#"{
            "flavor_name": "google",
            "build_type": "release",
            "version_name": "1.0",
            "version_code": 3,
            "application_id": "com.x"
        }"#;
        let variant: BuildVariant = serde_json::from_str(json).unwrap();
        assert_eq!(variant.build_type, BuildType::Release);
        assert!(!variant.signing_config);
        assert!(variant.name.is_empty());
    }
}
