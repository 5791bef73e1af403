//! Per-variant decisions and the full packing pass.
//!
//! Every variant ends on exactly one [`VariantAction`]:
//!
//! - debug variants are [`VariantAction::Skipped`] outright
//! - when the market file named any market, the manifest is stamped with the
//!   flavor name
//! - otherwise the version name may receive a build number suffix
//!
//! Non-debug variants that did not fail are then planned for archiving.

use std::path::PathBuf;

use serde::Serialize;
use time::OffsetDateTime;

use crate::archive::{ArchiveOutcome, ArchivePlan, archive_artifacts};
use crate::counter::{BuildCounter, counter_key};
use crate::manifest::{ManifestDocument, PatchOp};
use crate::market::{MarketExpansion, expand_markets};
use crate::naming::{self, NameTemplate, NameVariables};
use crate::project::ProjectDescriptor;
use crate::types::{BuildVariant, PackError, PackerOptions};

/// Terminal state of one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VariantAction {
    /// Debug build; nothing was touched.
    Skipped,
    /// The manifest got the flavor name stamped into it.
    ManifestPatched {
        manifest: PathBuf,
        operations: Vec<PatchOp>,
    },
    /// Markets exist but this variant could not be stamped.
    ManifestSkipped { reason: String },
    /// The version name received a build number suffix.
    VersionBumped {
        previous: String,
        build_number: String,
    },
    /// No market, no override and no eligible auto-increment.
    Unchanged,
    /// The step failed; siblings were still processed.
    Failed { reason: String },
}

/// Outcome of processing one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantReport {
    pub variant: String,
    pub flavor_name: String,
    pub build_type: String,
    /// Version name after any bump.
    pub version_name: String,
    pub action: VariantAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchivePlan>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Archive naming failure, kept apart from the step outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VariantReport {
    fn new(variant: &BuildVariant, action: VariantAction) -> Self {
        Self {
            variant: variant.name.clone(),
            flavor_name: variant.flavor_name.clone(),
            build_type: variant.build_type.to_string(),
            version_name: variant.version_name.clone(),
            action,
            archive: None,
            warnings: Vec::new(),
            error: None,
        }
    }

    /// Returns `true` if the step or the archive naming failed.
    pub fn failed(&self) -> bool {
        self.error.is_some() || matches!(self.action, VariantAction::Failed { .. })
    }
}

/// Applies the packer options to variants one at a time.
///
/// The counter is borrowed for the orchestrator's lifetime, so a whole pass
/// shares one store and each key is incremented at most once per variant.
pub struct VariantOrchestrator<'a, C: BuildCounter> {
    options: &'a PackerOptions,
    counter: &'a mut C,
    template: NameTemplate,
    markets_found: bool,
    app_name: Option<String>,
    project_name: Option<String>,
}

impl<'a, C: BuildCounter> VariantOrchestrator<'a, C> {
    /// Creates an orchestrator, parsing the archive name template up front.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::UnknownVariable`] or [`PackError::Config`] if the
    /// template is invalid. No variant has been touched at that point.
    pub fn new(
        options: &'a PackerOptions,
        counter: &'a mut C,
        markets_found: bool,
    ) -> Result<Self, PackError> {
        let template = NameTemplate::parse(options.name_template())?;
        Ok(Self {
            options,
            counter,
            template,
            markets_found,
            app_name: None,
            project_name: None,
        })
    }

    /// Sets the values of `appName` and `projectName`.
    pub fn with_names(mut self, app_name: Option<String>, project_name: Option<String>) -> Self {
        self.app_name = app_name;
        self.project_name = project_name;
        self
    }

    /// Processes every variant in order.
    pub fn process_all(&mut self, variants: &mut [BuildVariant]) -> Vec<VariantReport> {
        variants.iter_mut().map(|variant| self.process(variant)).collect()
    }

    /// Processes one variant, mutating its version name when bumped.
    pub fn process(&mut self, variant: &mut BuildVariant) -> VariantReport {
        if variant.is_debug() {
            tracing::debug!(variant = %variant.name, "debug variant skipped");
            return VariantReport::new(variant, VariantAction::Skipped);
        }

        let mut warnings = Vec::new();
        let step = if self.markets_found {
            self.stamp_manifest(variant, &mut warnings)
        } else {
            self.bump_version(variant)
        };
        let action = step.unwrap_or_else(|e| {
            tracing::error!(variant = %variant.name, error = %e, "variant step failed");
            VariantAction::Failed {
                reason: e.to_string(),
            }
        });

        let mut report = VariantReport::new(variant, action);
        if !matches!(report.action, VariantAction::Failed { .. }) {
            match self.plan_archive(variant, naming::now(), &mut warnings) {
                Ok(plan) => report.archive = plan,
                Err(e) => {
                    tracing::error!(variant = %variant.name, error = %e, "archive name failed");
                    report.error = Some(e.to_string());
                }
            }
        }
        report.warnings = warnings;
        report
    }

    fn stamp_manifest(
        &self,
        variant: &BuildVariant,
        warnings: &mut Vec<String>,
    ) -> Result<VariantAction, PackError> {
        let skip = |reason: &str, warnings: &mut Vec<String>| {
            tracing::warn!(variant = %variant.name, reason, "manifest not stamped");
            warnings.push(format!("manifest not stamped: {}", reason));
            VariantAction::ManifestSkipped {
                reason: reason.to_string(),
            }
        };

        if !variant.has_flavor() {
            return Ok(skip("variant has no flavor", warnings));
        }
        if variant.output.is_none() {
            return Ok(skip("variant has no build output", warnings));
        }
        let Some(manifest) = variant.manifest.as_deref() else {
            return Ok(skip("variant has no manifest", warnings));
        };
        if self.options.manifest_matcher.is_empty() {
            return Ok(skip("manifest matcher is empty", warnings));
        }

        let mut doc = ManifestDocument::load(manifest)?;
        let operations = doc.patch(&self.options.manifest_matcher, &variant.flavor_name)?;
        if self.options.dry_run {
            tracing::info!(variant = %variant.name, manifest = %manifest.display(), "dry run, manifest left untouched");
        } else {
            doc.save(manifest)?;
            tracing::info!(
                variant = %variant.name,
                manifest = %manifest.display(),
                flavor = %variant.flavor_name,
                "manifest stamped"
            );
        }

        Ok(VariantAction::ManifestPatched {
            manifest: manifest.to_path_buf(),
            operations,
        })
    }

    fn bump_version(&mut self, variant: &mut BuildVariant) -> Result<VariantAction, PackError> {
        let build_number = match self.options.build_num.as_deref().map(str::trim) {
            Some(build_num) if !build_num.is_empty() => build_num.to_string(),
            _ if self.options.build_number_auto
                && self.options.build_type_allowed(variant.build_type.as_str()) =>
            {
                let key = counter_key(&variant.version_name, variant.build_type.as_str());
                self.counter.increment(&key)?.to_string()
            }
            _ => {
                tracing::debug!(variant = %variant.name, "version name unchanged");
                return Ok(VariantAction::Unchanged);
            }
        };

        let previous = std::mem::take(&mut variant.version_name);
        variant.version_name = format!("{}.{}", previous, build_number);
        tracing::info!(
            variant = %variant.name,
            from = %previous,
            to = %variant.version_name,
            "version name bumped"
        );
        Ok(VariantAction::VersionBumped {
            previous,
            build_number,
        })
    }

    fn plan_archive(
        &self,
        variant: &BuildVariant,
        time: OffsetDateTime,
        warnings: &mut Vec<String>,
    ) -> Result<Option<ArchivePlan>, PackError> {
        let reason = if !variant.signing_config {
            Some("no signing config")
        } else if !variant.zip_align {
            Some("zip-align disabled")
        } else if variant.output.is_none() {
            Some("no build output")
        } else {
            None
        };
        if let Some(reason) = reason {
            tracing::warn!(variant = %variant.name, reason, "artifact not archived");
            warnings.push(format!("artifact not archived: {}", reason));
            return Ok(None);
        }
        let Some(source) = variant.output.clone() else {
            return Ok(None);
        };

        let vars = NameVariables::for_variant(
            variant,
            self.app_name.as_deref(),
            self.project_name.as_deref(),
        );
        let file_name = self.template.archive_file_name(&vars, time)?;
        Ok(Some(ArchivePlan {
            variant: variant.name.clone(),
            source,
            file_name,
            build_time: naming::format_build_time(time),
        }))
    }
}

/// Result of a full packing pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackReport {
    /// Market expansion, absent when no market file applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markets: Option<MarketExpansion>,
    /// Flavors declared after expansion.
    pub flavors: Vec<String>,
    pub variants: Vec<VariantReport>,
    /// Archive directory, absent on dry runs or when nothing was planned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_dir: Option<PathBuf>,
    pub archives: Vec<ArchiveOutcome>,
}

impl PackReport {
    /// Number of variants whose step or archive failed.
    pub fn failures(&self) -> usize {
        self.variants.iter().filter(|report| report.failed()).count()
            + self.archives.iter().filter(|outcome| !outcome.is_copied()).count()
    }
}

/// Runs a full pass over `project`.
///
/// Order: validate the descriptor, parse the name template, expand markets
/// and declare the new flavors, process every variant, then archive.
/// Archiving is skipped on dry runs and when no variant produced a plan.
///
/// # Errors
///
/// Only run-wide problems are returned: an unsupported descriptor, an
/// invalid template, an unreadable market file, or a failed cleanup of the
/// archive directory. Per-variant failures are recorded on the report.
///
/// # Example
///
/// ```
/// use flavorpack_sdk::{pack, BuildType, BuildVariant, MemoryCounterStore, PackerOptions, ProjectDescriptor};
///
/// let mut project = ProjectDescriptor {
///     variants: vec![BuildVariant::new("", BuildType::Release, "2.0", 1, "com.x")],
///     ..ProjectDescriptor::default()
/// };
/// let options = PackerOptions { build_number_auto: true, dry_run: true, ..PackerOptions::default() };
/// let mut counter = MemoryCounterStore::new();
///
/// let report = pack(&mut project, &options, &mut counter)?;
/// assert_eq!(report.variants[0].version_name, "2.0.1");
/// # Ok::<(), flavorpack_sdk::PackError>(())
/// ```
pub fn pack<C: BuildCounter>(
    project: &mut ProjectDescriptor,
    options: &PackerOptions,
    counter: &mut C,
) -> Result<PackReport, PackError> {
    project.validate()?;
    project.normalize();

    let markets = expand_markets(options.market_file.as_deref(), &project.flavor_set())?;
    if let Some(expansion) = &markets {
        project.declare_flavors(&expansion.new_flavors);
        for flavor in &expansion.new_flavors {
            tracing::info!(flavor = %flavor, "flavor declared from market file");
        }
    }
    let markets_found = markets.as_ref().is_some_and(MarketExpansion::markets_found);

    let variants = {
        let mut orchestrator = VariantOrchestrator::new(options, counter, markets_found)?
            .with_names(project.app_name.clone(), project.project_name.clone());
        orchestrator.process_all(&mut project.variants)
    };

    let plans: Vec<ArchivePlan> = variants
        .iter()
        .filter_map(|report| report.archive.clone())
        .collect();
    let (archive_dir, archives) = if options.dry_run {
        tracing::info!(planned = plans.len(), "dry run, archiving skipped");
        (None, Vec::new())
    } else if plans.is_empty() {
        tracing::info!("nothing to archive");
        (None, Vec::new())
    } else {
        let outcomes = archive_artifacts(&plans, &options.archive_output)?;
        (Some(options.archive_output.clone()), outcomes)
    };

    Ok(PackReport {
        markets,
        flavors: project.flavors.clone(),
        variants,
        archive_dir,
        archives,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::MemoryCounterStore;
    use crate::types::BuildType;
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::TempDir;
    use time::macros::datetime;

    const MANIFEST: &str = r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android">
    <application>
        <meta-data android:name="UMENG_CHANNEL" android:value="default" />
    </application>
</manifest>
"#;

    fn release(flavor: &str) -> BuildVariant {
        let mut variant = BuildVariant::new(flavor, BuildType::Release, "2.0", 20, "com.x");
        variant.output = Some(PathBuf::from("/tmp/app.apk"));
        variant
    }

    #[test]
    fn test_debug_variant_is_skipped() {
        let options = PackerOptions {
            build_number_auto: true,
            ..PackerOptions::default()
        };
        let mut counter = MemoryCounterStore::new();
        let mut orchestrator = VariantOrchestrator::new(&options, &mut counter, false).unwrap();

        let mut variant = BuildVariant::new("", BuildType::Debug, "2.0", 1, "com.x");
        let report = orchestrator.process(&mut variant);

        assert_eq!(report.action, VariantAction::Skipped);
        assert!(report.archive.is_none());
        assert_eq!(variant.version_name, "2.0");
        assert_eq!(counter.current("2.0.debug.build"), 0);
    }

    #[test]
    fn test_auto_increment_bumps_version() {
        let options = PackerOptions {
            build_number_auto: true,
            ..PackerOptions::default()
        };
        let mut counter = MemoryCounterStore::new();
        let mut orchestrator = VariantOrchestrator::new(&options, &mut counter, false).unwrap();

        let mut variant = release("");
        let report = orchestrator.process(&mut variant);

        assert_eq!(variant.version_name, "2.0.1");
        assert_eq!(
            report.action,
            VariantAction::VersionBumped {
                previous: "2.0".into(),
                build_number: "1".into()
            }
        );
        let plan = report.archive.unwrap();
        assert!(plan.file_name.starts_with("com.x--release-v2.0.1-20"));
    }

    #[test]
    fn test_build_num_override_wins() {
        let options = PackerOptions {
            build_number_auto: true,
            build_num: Some("42".into()),
            ..PackerOptions::default()
        };
        let mut counter = MemoryCounterStore::new();
        let mut orchestrator = VariantOrchestrator::new(&options, &mut counter, false).unwrap();

        let mut variant = release("");
        orchestrator.process(&mut variant);

        assert_eq!(variant.version_name, "2.0.42");
        assert_eq!(counter.current("2.0.release.build"), 0);
    }

    #[test]
    fn test_type_matcher_excludes_build_type() {
        let options = PackerOptions {
            build_number_auto: true,
            build_number_type_matcher: Some(BTreeSet::from(["beta".to_string()])),
            ..PackerOptions::default()
        };
        let mut counter = MemoryCounterStore::new();
        let mut orchestrator = VariantOrchestrator::new(&options, &mut counter, false).unwrap();

        let mut variant = release("");
        let report = orchestrator.process(&mut variant);

        assert_eq!(report.action, VariantAction::Unchanged);
        assert_eq!(variant.version_name, "2.0");
        assert!(report.archive.is_some());
    }

    #[test]
    fn test_markets_stamp_manifest_instead_of_bumping() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("AndroidManifest.xml");
        fs::write(&manifest, MANIFEST).unwrap();

        let options = PackerOptions {
            build_number_auto: true,
            manifest_matcher: vec!["UMENG_CHANNEL".into()],
            ..PackerOptions::default()
        };
        let mut counter = MemoryCounterStore::new();
        let mut orchestrator = VariantOrchestrator::new(&options, &mut counter, true).unwrap();

        let mut variant = release("google");
        variant.manifest = Some(manifest.clone());
        let report = orchestrator.process(&mut variant);

        assert!(matches!(report.action, VariantAction::ManifestPatched { .. }));
        assert_eq!(variant.version_name, "2.0");
        assert!(fs::read_to_string(&manifest).unwrap().contains(r#"android:value="google""#));
    }

    #[test]
    fn test_dry_run_leaves_manifest_on_disk() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("AndroidManifest.xml");
        fs::write(&manifest, MANIFEST).unwrap();

        let options = PackerOptions {
            manifest_matcher: vec!["UMENG_CHANNEL".into()],
            dry_run: true,
            ..PackerOptions::default()
        };
        let mut counter = MemoryCounterStore::new();
        let mut orchestrator = VariantOrchestrator::new(&options, &mut counter, true).unwrap();

        let mut variant = release("google");
        variant.manifest = Some(manifest.clone());
        let report = orchestrator.process(&mut variant);

        assert!(matches!(report.action, VariantAction::ManifestPatched { .. }));
        assert_eq!(fs::read_to_string(&manifest).unwrap(), MANIFEST);
    }

    #[test]
    fn test_manifest_skipped_without_flavor() {
        let options = PackerOptions {
            manifest_matcher: vec!["UMENG_CHANNEL".into()],
            ..PackerOptions::default()
        };
        let mut counter = MemoryCounterStore::new();
        let mut orchestrator = VariantOrchestrator::new(&options, &mut counter, true).unwrap();

        let mut variant = release("");
        let report = orchestrator.process(&mut variant);

        assert!(matches!(report.action, VariantAction::ManifestSkipped { .. }));
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_missing_manifest_file_fails_variant() {
        let dir = TempDir::new().unwrap();
        let options = PackerOptions {
            manifest_matcher: vec!["UMENG_CHANNEL".into()],
            ..PackerOptions::default()
        };
        let mut counter = MemoryCounterStore::new();
        let mut orchestrator = VariantOrchestrator::new(&options, &mut counter, true).unwrap();

        let mut variant = release("google");
        variant.manifest = Some(dir.path().join("missing.xml"));
        let report = orchestrator.process(&mut variant);

        assert!(report.failed());
        assert!(report.archive.is_none());
    }

    #[test]
    fn test_unsigned_variant_is_not_archived() {
        let options = PackerOptions::default();
        let mut counter = MemoryCounterStore::new();
        let mut orchestrator = VariantOrchestrator::new(&options, &mut counter, false).unwrap();

        let mut variant = release("google");
        variant.signing_config = false;
        let report = orchestrator.process(&mut variant);

        assert_eq!(report.action, VariantAction::Unchanged);
        assert!(report.archive.is_none());
        assert_eq!(report.warnings, vec!["artifact not archived: no signing config"]);
    }

    #[test]
    fn test_bad_template_rejected_before_any_variant() {
        let options = PackerOptions {
            archive_name_format: Some("${appPkg}-${channel}".into()),
            ..PackerOptions::default()
        };
        let mut counter = MemoryCounterStore::new();
        let result = VariantOrchestrator::new(&options, &mut counter, false);
        assert!(matches!(result, Err(PackError::UnknownVariable(name)) if name == "channel"));
    }

    #[test]
    fn test_plan_records_build_time() {
        let options = PackerOptions {
            archive_name_format: Some("${appName}-${buildTime}".into()),
            ..PackerOptions::default()
        };
        let mut counter = MemoryCounterStore::new();
        let orchestrator = VariantOrchestrator::new(&options, &mut counter, false)
            .unwrap()
            .with_names(Some("app".into()), None);

        let mut warnings = Vec::new();
        let plan = orchestrator
            .plan_archive(&release("google"), datetime!(2024-03-05 07:08:09 UTC), &mut warnings)
            .unwrap()
            .unwrap();

        assert_eq!(plan.file_name, "app-2024-03-05-07-08-09.apk");
        assert_eq!(plan.build_time, "2024-03-05-07-08-09");
    }

    #[test]
    fn test_missing_template_variable_is_per_variant() {
        let options = PackerOptions {
            archive_name_format: Some("${projectName}".into()),
            ..PackerOptions::default()
        };
        let mut counter = MemoryCounterStore::new();
        let mut orchestrator = VariantOrchestrator::new(&options, &mut counter, false).unwrap();

        let mut variant = release("google");
        let report = orchestrator.process(&mut variant);

        assert_eq!(report.action, VariantAction::Unchanged);
        assert!(report.error.is_some());
        assert!(report.failed());
    }

    #[test]
    fn test_pack_declares_market_flavors_and_archives() {
        let dir = TempDir::new().unwrap();
        let markets = dir.path().join("markets.txt");
        fs::write(&markets, "google#notes here\nbaidu\n").unwrap();
        let manifest = dir.path().join("AndroidManifest.xml");
        fs::write(&manifest, MANIFEST).unwrap();
        let apk = dir.path().join("app.apk");
        fs::write(&apk, "apk").unwrap();

        let mut variant = BuildVariant::new("baidu", BuildType::Release, "1.0", 3, "com.x");
        variant.manifest = Some(manifest);
        variant.output = Some(apk);
        let mut project = ProjectDescriptor {
            flavors: vec!["baidu".into()],
            variants: vec![variant],
            ..ProjectDescriptor::default()
        };
        let options = PackerOptions {
            archive_output: dir.path().join("archives"),
            manifest_matcher: vec!["UMENG_CHANNEL".into()],
            market_file: Some(markets),
            ..PackerOptions::default()
        };
        let mut counter = MemoryCounterStore::new();

        let report = pack(&mut project, &options, &mut counter).unwrap();

        assert_eq!(report.markets.as_ref().unwrap().new_flavors, vec!["google"]);
        assert_eq!(project.flavors, vec!["baidu", "google"]);
        assert_eq!(report.archives.len(), 1);
        assert!(report.archives[0].is_copied());
        assert!(dir.path().join("archives/com.x-baidu-release-v1.0-3.apk").exists());
        assert_eq!(report.failures(), 0);
    }
}
