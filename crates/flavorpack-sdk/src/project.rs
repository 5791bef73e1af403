//! Project descriptors.
//!
//! The host build system describes the project once: declared flavors and
//! every variant it built. flavorpack reads that description from a YAML or
//! JSON file:
//!
//! ```yaml
//! format_version: 1
//! app_name: app
//! project_name: shop
//! flavors: [baidu]
//! variants:
//!   - flavor_name: baidu
//!     build_type: release
//!     version_name: "2.0"
//!     version_code: 20
//!     application_id: com.example.shop
//!     signing_config: true
//!     zip_align: true
//!     manifest: app/build/intermediates/merged_manifests/baiduRelease/AndroidManifest.xml
//!     output: app/build/outputs/apk/baidu/release/app-baidu-release.apk
//! ```
//!
//! Relative `manifest` and `output` paths are resolved against the directory
//! that contains the descriptor.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{BuildVariant, PackError};

/// Descriptor format understood by this version of flavorpack.
pub const DESCRIPTOR_FORMAT_VERSION: u32 = 1;

fn default_format_version() -> u32 {
    DESCRIPTOR_FORMAT_VERSION
}

/// The project as seen by the packer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    /// Application module name (`appName` in templates).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    /// Root project name (`projectName` in templates).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    /// Declared flavors, in declaration order.
    #[serde(default)]
    pub flavors: Vec<String>,
    #[serde(default)]
    pub variants: Vec<BuildVariant>,
}

impl Default for ProjectDescriptor {
    fn default() -> Self {
        Self {
            format_version: DESCRIPTOR_FORMAT_VERSION,
            app_name: None,
            project_name: None,
            flavors: Vec::new(),
            variants: Vec::new(),
        }
    }
}

impl ProjectDescriptor {
    /// Loads a descriptor from `.yaml`/`.yml` or `.json`.
    ///
    /// Missing variant names are filled in and relative paths are resolved
    /// against the descriptor's directory.
    ///
    /// # Errors
    ///
    /// * [`PackError::Io`] - the file cannot be read
    /// * [`PackError::Serialization`] - invalid JSON
    /// * [`PackError::Config`] - invalid YAML, unknown extension, or an
    ///   unsupported `format_version`
    pub fn load(path: &Path) -> Result<Self, PackError> {
        let contents = fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();

        let mut descriptor: ProjectDescriptor = match extension {
            "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|e| {
                PackError::Config(format!("invalid project descriptor {}: {}", path.display(), e))
            })?,
            "json" => serde_json::from_str(&contents)?,
            other => {
                return Err(PackError::Config(format!(
                    "unsupported project descriptor extension '{}' for {}. Use .yaml, .yml or .json",
                    other,
                    path.display()
                )));
            }
        };

        descriptor.validate()?;
        descriptor.normalize();
        if let Some(base) = path.parent() {
            descriptor.resolve_paths(base);
        }
        Ok(descriptor)
    }

    /// Rejects descriptors written for another format version.
    pub fn validate(&self) -> Result<(), PackError> {
        if self.format_version != DESCRIPTOR_FORMAT_VERSION {
            return Err(PackError::Config(format!(
                "unsupported project descriptor format_version {} (expected {})",
                self.format_version, DESCRIPTOR_FORMAT_VERSION
            )));
        }
        Ok(())
    }

    /// Fills in variant names the descriptor left out.
    pub fn normalize(&mut self) {
        for variant in &mut self.variants {
            variant.ensure_name();
        }
    }

    /// Joins relative manifest and output paths onto `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for variant in &mut self.variants {
            for path in [&mut variant.manifest, &mut variant.output]
                .into_iter()
                .flatten()
            {
                *path = resolve_against(base, path);
            }
        }
    }

    /// Declared flavors as a set.
    pub fn flavor_set(&self) -> BTreeSet<String> {
        self.flavors.iter().cloned().collect()
    }

    /// Registers flavors that are not declared yet, keeping order.
    pub fn declare_flavors(&mut self, flavors: &[String]) {
        for flavor in flavors {
            if !self.flavors.contains(flavor) {
                self.flavors.push(flavor.clone());
            }
        }
    }
}

/// Resolves `path` against `base` unless it is already absolute.
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuildType;
    use tempfile::TempDir;

    const YAML: &str = r#"
app_name: app
project_name: shop
flavors: [baidu]
variants:
  - flavor_name: baidu
    build_type: release
    version_name: "2.0"
    version_code: 20
    application_id: com.example.shop
    signing_config: true
    zip_align: true
    manifest: manifests/AndroidManifest.xml
    output: /abs/app.apk
  - flavor_name: baidu
    build_type: debug
    version_name: "2.0"
    version_code: 20
    application_id: com.example.shop
"#;

    #[test]
    fn test_load_yaml_descriptor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.yaml");
        fs::write(&path, YAML).unwrap();

        let descriptor = ProjectDescriptor::load(&path).unwrap();

        assert_eq!(descriptor.format_version, 1);
        assert_eq!(descriptor.app_name.as_deref(), Some("app"));
        assert_eq!(descriptor.variants.len(), 2);
        assert_eq!(descriptor.variants[0].name, "baiduRelease");
        assert_eq!(descriptor.variants[1].build_type, BuildType::Debug);
        assert_eq!(
            descriptor.variants[0].manifest,
            Some(dir.path().join("manifests/AndroidManifest.xml"))
        );
        assert_eq!(descriptor.variants[0].output, Some(PathBuf::from("/abs/app.apk")));
    }

    #[test]
    fn test_load_json_descriptor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.json");
        fs::write(
            &path,
            r#"{"flavors": [], "variants": [{"build_type": "release", "version_name": "1.0", "version_code": 1, "application_id": "com.x"}]}"#,
        )
        .unwrap();

        let descriptor = ProjectDescriptor::load(&path).unwrap();
        assert_eq!(descriptor.variants[0].name, "release");
    }

    #[test]
    fn test_default_descriptor_is_valid() {
        let descriptor = ProjectDescriptor::default();
        assert_eq!(descriptor.format_version, DESCRIPTOR_FORMAT_VERSION);
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn test_unsupported_format_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.yaml");
        fs::write(&path, "format_version: 2\n").unwrap();

        let err = ProjectDescriptor::load(&path).unwrap_err();
        assert!(matches!(err, PackError::Config(_)));
    }

    #[test]
    fn test_unknown_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.txt");
        fs::write(&path, "").unwrap();

        assert!(matches!(
            ProjectDescriptor::load(&path).unwrap_err(),
            PackError::Config(_)
        ));
    }

    #[test]
    fn test_resolve_against() {
        let base = Path::new("/project");
        assert_eq!(resolve_against(base, Path::new("a/b")), PathBuf::from("/project/a/b"));
        assert_eq!(resolve_against(base, Path::new("/abs")), PathBuf::from("/abs"));
    }

    #[test]
    fn test_declare_flavors_keeps_order_and_skips_known() {
        let mut descriptor = ProjectDescriptor {
            flavors: vec!["baidu".into()],
            ..ProjectDescriptor::default()
        };
        descriptor.declare_flavors(&["google".into(), "baidu".into(), "xiaomi".into()]);
        assert_eq!(descriptor.flavors, vec!["baidu", "google", "xiaomi"]);
    }
}
