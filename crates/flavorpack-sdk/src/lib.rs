//! Build-variant post-processing for Android style builds
//!
//! `flavorpack-sdk` runs after a multi-flavor build has produced its variants.
//! It expands a market list into flavors, stamps each flavored manifest with
//! its channel, appends build numbers to version names and copies the signed
//! artifacts into one archive directory under templated names.
//!
//! # Quick Start
//!
//! 1. Describe the project (`project.yaml`):
//! ```yaml
//! app_name: app
//! flavors: [baidu]
//! variants:
//!   - flavor_name: baidu
//!     build_type: release
//!     version_name: "2.0"
//!     version_code: 20
//!     application_id: com.example.shop
//!     signing_config: true
//!     zip_align: true
//!     manifest: build/baiduRelease/AndroidManifest.xml
//!     output: build/outputs/app-baidu-release.apk
//! ```
//!
//! 2. Run a pass:
//! ```no_run
//! use flavorpack_sdk::{pack, FileCounterStore, PackerOptions, ProjectDescriptor};
//! use std::path::Path;
//!
//! fn main() -> Result<(), flavorpack_sdk::PackError> {
//!     let mut project = ProjectDescriptor::load(Path::new("project.yaml"))?;
//!     let mut counter = FileCounterStore::load("flavorpack.properties")?;
//!     let options = PackerOptions {
//!         market_file: Some("markets.txt".into()),
//!         manifest_matcher: vec!["UMENG_CHANNEL".to_string()],
//!         build_number_auto: true,
//!         ..PackerOptions::default()
//!     };
//!
//!     let report = pack(&mut project, &options, &mut counter)?;
//!     for variant in &report.variants {
//!         println!("{} -> {}", variant.variant, variant.version_name);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Market**: reads the market file and reports undeclared flavors
//! - **Manifest**: find-or-insert `<meta-data>` patching over an explicit XML tree
//! - **Counter**: per `{version}.{buildType}` build numbers in a properties file
//! - **Naming**: `${variable}` archive name templates
//! - **Orchestrator**: the per-variant state machine and the full [`pack`] pass
//! - **Archive**: cleans the archive directory and copies planned artifacts

// Public modules
pub mod archive;
pub mod counter;
pub mod manifest;
pub mod market;
pub mod naming;
pub mod orchestrator;
pub mod project;
pub mod types;

// Re-export key types for convenience
pub use archive::{ArchiveOutcome, ArchivePlan, archive_artifacts, clean_output_dir};
pub use counter::{
    BuildCounter, FileCounterStore, LazyCounterStore, MemoryCounterStore, counter_key,
};
pub use manifest::{ManifestDocument, PatchOp, patch_manifest_file};
pub use market::{MarketExpansion, expand_markets};
pub use naming::{NameTemplate, NameVariables};
pub use orchestrator::{PackReport, VariantAction, VariantOrchestrator, VariantReport, pack};
pub use project::ProjectDescriptor;
pub use types::{BuildType, BuildVariant, DEFAULT_NAME_TEMPLATE, PackError, PackerOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
