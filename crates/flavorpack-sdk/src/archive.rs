//! Copying built artifacts into the archive directory.
//!
//! The archive directory is owned by flavorpack: it is emptied once per run
//! and then receives one renamed copy per planned variant.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::types::PackError;

/// One artifact to copy, decided by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchivePlan {
    /// Variant the artifact belongs to.
    pub variant: String,
    /// Built artifact.
    pub source: PathBuf,
    /// File name inside the archive directory, including `.apk`.
    pub file_name: String,
    /// `buildTime` value used when the name was rendered.
    pub build_time: String,
}

/// What happened to a single plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArchiveOutcome {
    Copied { variant: String, destination: PathBuf },
    Failed { variant: String, reason: String },
}

impl ArchiveOutcome {
    pub fn variant(&self) -> &str {
        match self {
            ArchiveOutcome::Copied { variant, .. } | ArchiveOutcome::Failed { variant, .. } => {
                variant
            }
        }
    }

    pub fn is_copied(&self) -> bool {
        matches!(self, ArchiveOutcome::Copied { .. })
    }
}

/// Removes everything inside `dir`, leaving `dir` itself in place.
///
/// Creates `dir` (and its parents) if it does not exist.
pub fn clean_output_dir(dir: &Path) -> Result<(), PackError> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        return Ok(());
    }
    if !dir.is_dir() {
        return Err(PackError::Archive(format!(
            "archive output {} exists and is not a directory",
            dir.display()
        )));
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    tracing::debug!(dir = %dir.display(), "archive output cleaned");
    Ok(())
}

/// Cleans `dir` once and copies every plan into it.
///
/// A failing copy is reported in the returned list and does not stop the
/// remaining plans. Only the cleanup itself is fatal. A plan whose file name
/// was already taken by an earlier plan fails instead of overwriting it.
pub fn archive_artifacts(plans: &[ArchivePlan], dir: &Path) -> Result<Vec<ArchiveOutcome>, PackError> {
    clean_output_dir(dir)?;

    let mut taken = HashSet::new();
    let outcomes = plans
        .iter()
        .map(|plan| {
            let result = if taken.insert(plan.file_name.as_str()) {
                copy_artifact(plan, dir)
            } else {
                Err(PackError::Archive(format!(
                    "duplicate archive name {} for variant {}; include ${{flavorName}} or \
                     ${{buildType}} in the archive name template",
                    plan.file_name, plan.variant
                )))
            };
            match result {
                Ok(destination) => {
                    tracing::info!(
                        variant = %plan.variant,
                        destination = %destination.display(),
                        "artifact archived"
                    );
                    ArchiveOutcome::Copied {
                        variant: plan.variant.clone(),
                        destination,
                    }
                }
                Err(e) => {
                    tracing::error!(variant = %plan.variant, error = %e, "archiving failed");
                    ArchiveOutcome::Failed {
                        variant: plan.variant.clone(),
                        reason: e.to_string(),
                    }
                }
            }
        })
        .collect();
    Ok(outcomes)
}

fn copy_artifact(plan: &ArchivePlan, dir: &Path) -> Result<PathBuf, PackError> {
    if !plan.source.is_file() {
        return Err(PackError::Archive(format!(
            "build output {} not found for variant {}",
            plan.source.display(),
            plan.variant
        )));
    }
    let destination = dir.join(&plan.file_name);
    fs::copy(&plan.source, &destination)?;
    Ok(destination)
}
