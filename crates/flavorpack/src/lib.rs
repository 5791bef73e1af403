//! # flavorpack
//!
//! Command-line tool for post-processing multi-flavor Android builds.
//!
//! ## Overview
//!
//! `flavorpack` is the CLI front end for [`flavorpack_sdk`]. It handles:
//!
//! - **Markets** - Expands a market list into build flavors
//! - **Channel stamping** - Writes the flavor into each variant's manifest
//! - **Build numbers** - Appends explicit or auto-incremented build numbers
//! - **Archiving** - Copies signed artifacts into one directory under templated names
//!
//! ## Quick Start
//!
//! ```bash
//! # Write a starter flavorpack.toml
//! flavorpack init
//!
//! # Run a full pass and keep a JSON report
//! flavorpack process --market markets.txt --report build/flavorpack.json
//!
//! # Preview without touching manifests, counters or archives
//! flavorpack --dry-run process
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `init` | Write a starter `flavorpack.toml` |
//! | `process` | Full pass over the project descriptor |
//! | `markets` | Show which markets are not declared as flavors yet |
//! | `name` | Render an archive name template |
//! | `bump` | Increment one build number |
//! | `patch-manifest` | Stamp a single manifest |
//!
//! ## CLI Flags
//!
//! Global flags available on all commands:
//!
//! - **`--dry-run`** - Preview what would be done without making changes
//! - **`--verbose` / `-v`** - Debug-level diagnostics on stderr
//! - **`--config`** - Use this `flavorpack.toml` instead of discovering one
//!
//! ## Modules
//!
//! - [`config`] - Configuration file support for `flavorpack.toml`
//! - [`logging`] - `tracing` subscriber setup

#![cfg_attr(docsrs, feature(doc_cfg))]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use flavorpack_sdk::counter::counter_key;
use flavorpack_sdk::naming::{self, NameTemplate, NameVariables};
use flavorpack_sdk::{
    BuildCounter, FileCounterStore, LazyCounterStore, ManifestDocument, MemoryCounterStore,
    PackReport, PatchOp, ProjectDescriptor, VariantAction, expand_markets, pack,
    patch_manifest_file,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use config::{CliOverrides, ConfigResolver, FlavorpackConfig};

pub mod config;
pub mod logging;

/// Post-processing for multi-flavor Android builds.
#[derive(Parser, Debug)]
#[command(name = "flavorpack", author, version, about = "Multi-flavor build packer", long_about = None)]
struct Cli {
    /// Print what would be done without actually doing it
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print debug diagnostics
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Path to flavorpack.toml (default: discovered from the current directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a starter flavorpack.toml.
    Init {
        #[arg(long, default_value = config::CONFIG_FILE_NAME)]
        output: PathBuf,
        #[arg(long, default_value = config::DEFAULT_DESCRIPTOR, help = "Project descriptor path to record")]
        descriptor: String,
    },
    /// Expand markets, stamp manifests or bump versions, then archive.
    Process {
        #[arg(long, help = "Project descriptor (YAML or JSON)")]
        descriptor: Option<PathBuf>,
        #[arg(long, help = "Build number store")]
        counter_store: Option<PathBuf>,
        #[arg(long, help = "Archive directory; overrides packer.archive_output")]
        output: Option<PathBuf>,
        #[arg(long, help = "Market list file")]
        market: Option<PathBuf>,
        #[arg(long, env = "FLAVORPACK_BUILD_NUM", help = "Explicit build number")]
        build_num: Option<String>,
        #[arg(long, help = "Archive name template")]
        archive_name_format: Option<String>,
        #[arg(long, help = "Optional output path for JSON report")]
        report: Option<PathBuf>,
    },
    /// Show which markets are not declared as flavors yet.
    Markets {
        #[arg(long, help = "Market list file")]
        market: Option<PathBuf>,
        #[arg(long, value_delimiter = ',', help = "Already declared flavors")]
        existing: Vec<String>,
    },
    /// Render an archive name template.
    Name {
        #[arg(long, help = "Template (default: from config, then the built-in default)")]
        template: Option<String>,
        #[arg(long)]
        app_name: Option<String>,
        #[arg(long)]
        project_name: Option<String>,
        #[arg(long)]
        flavor_name: Option<String>,
        #[arg(long)]
        build_type: Option<String>,
        #[arg(long)]
        version_name: Option<String>,
        #[arg(long)]
        version_code: Option<u32>,
        #[arg(long)]
        app_pkg: Option<String>,
        #[arg(long, help = "Print the rendered name without the .apk extension")]
        bare: bool,
    },
    /// Increment the build number for a version and build type.
    Bump {
        #[arg(long)]
        version_name: String,
        #[arg(long, default_value = "release")]
        build_type: String,
        #[arg(long, help = "Build number store")]
        counter_store: Option<PathBuf>,
    },
    /// Stamp a single manifest with a value.
    PatchManifest {
        manifest: PathBuf,
        #[arg(long, help = "Value to write, usually the flavor name")]
        value: String,
        #[arg(long = "matcher", help = "Metadata names to stamp (default: packer.manifest_matcher)")]
        matchers: Vec<String>,
    },
}

pub fn run() -> Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;
    let resolver = ConfigResolver::new(cli.config.as_deref())?;
    if let Some(path) = &resolver.config_path {
        tracing::debug!(path = %path.display(), "using configuration file");
    }

    match cli.command {
        Command::Init { output, descriptor } => cmd_init(&output, &descriptor, cli.dry_run),
        Command::Process {
            descriptor,
            counter_store,
            output,
            market,
            build_num,
            archive_name_format,
            report,
        } => {
            let overrides = CliOverrides {
                descriptor,
                counter_store,
                output,
                market,
                build_num,
                archive_name_format,
                dry_run: cli.dry_run,
            };
            let pack_report = cmd_process(&resolver, &overrides)?;
            if let Some(path) = report {
                write_json(&path, &pack_report)?;
                println!("JSON report written to {:?}", path);
            }
            let failures = pack_report.failures();
            if failures > 0 {
                bail!("{} variant step(s) failed; see the summary above", failures);
            }
            Ok(())
        }
        Command::Markets { market, existing } => cmd_markets(&resolver, market, existing),
        Command::Name {
            template,
            app_name,
            project_name,
            flavor_name,
            build_type,
            version_name,
            version_code,
            app_pkg,
            bare,
        } => {
            let vars = NameVariables {
                app_name,
                project_name,
                flavor_name,
                build_type,
                version_name,
                version_code,
                app_pkg,
            };
            let name = cmd_name(&resolver, template, &vars, bare)?;
            println!("{}", name);
            Ok(())
        }
        Command::Bump {
            version_name,
            build_type,
            counter_store,
        } => {
            let store = resolver.counter_store(counter_store);
            cmd_bump(&store, &version_name, &build_type, cli.dry_run).map(|_| ())
        }
        Command::PatchManifest {
            manifest,
            value,
            matchers,
        } => cmd_patch_manifest(&resolver, &manifest, &value, matchers, cli.dry_run).map(|_| ()),
    }
}

fn load_dotenv() {
    if let Ok(cwd) = std::env::current_dir() {
        let root = find_project_root(&cwd).unwrap_or(cwd);
        let _ = dotenvy::from_path(root.join(".env.local"));
    }
}

fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|candidate| {
            candidate.join(config::CONFIG_FILE_NAME).is_file() || candidate.join(".git").exists()
        })
        .map(|root| root.to_path_buf())
}

fn ensure_can_write(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("refusing to overwrite existing file: {:?}", path);
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating parent directory {:?}", parent))?;
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating parent directory {:?}", parent))?;
    }
    let contents = serde_json::to_string_pretty(value)?;
    fs::write(path, contents).with_context(|| format!("writing file {:?}", path))
}

/// Write a starter flavorpack.toml
fn cmd_init(output: &Path, descriptor: &str, dry_run: bool) -> Result<()> {
    ensure_can_write(output)?;
    let contents = FlavorpackConfig::generate_starter_toml(descriptor);

    if dry_run {
        println!("[dry-run] Would write {:?}:\n", output);
        println!("{}", contents);
        return Ok(());
    }

    fs::write(output, contents).with_context(|| format!("Failed to write {:?}", output))?;
    println!("Wrote {:?}", output);
    println!("\nNext steps:");
    println!("  1. Describe your flavors and built variants in {}", descriptor);
    println!("  2. Edit {:?} to set the manifest matcher and archive naming", output);
    println!("  3. Run 'flavorpack process' after each build");
    Ok(())
}

/// Run a full pass over the project descriptor
fn cmd_process(resolver: &ConfigResolver, overrides: &CliOverrides) -> Result<PackReport> {
    let descriptor_path = resolver.descriptor(overrides.descriptor.clone());
    let mut project = ProjectDescriptor::load(&descriptor_path)
        .with_context(|| format!("Failed to load project descriptor {:?}", descriptor_path))?;
    let options = resolver.packer_options(overrides);
    let store_path = resolver.counter_store(overrides.counter_store.clone());

    println!(
        "Packing {} variant(s) from {:?}{}",
        project.variants.len(),
        descriptor_path,
        if options.dry_run { " [dry-run]" } else { "" }
    );

    let report = if options.dry_run {
        let mut counter = MemoryCounterStore::seeded_from(&store_path)
            .with_context(|| format!("Failed to read build number store {:?}", store_path))?;
        pack(&mut project, &options, &mut counter)
    } else {
        let mut counter = LazyCounterStore::new(&store_path);
        pack(&mut project, &options, &mut counter)
    }
    .context("Packing failed")?;

    print_summary(&report);
    Ok(report)
}

fn print_summary(report: &PackReport) {
    match &report.markets {
        Some(markets) if markets.markets_found() => {
            println!("Markets: {}", markets.markets.join(", "));
            if !markets.new_flavors.is_empty() {
                println!("New flavors: {}", markets.new_flavors.join(", "));
            }
        }
        _ => println!("No markets; build numbers apply"),
    }

    println!();
    for variant in &report.variants {
        println!("  {:<24} {}", variant.variant, describe_action(&variant.action));
        if let Some(plan) = &variant.archive {
            println!("  {:<24}   -> {}", "", plan.file_name);
        }
        for warning in &variant.warnings {
            println!("  {:<24}   ! {}", "", warning);
        }
        if let Some(error) = &variant.error {
            println!("  {:<24}   ✗ {}", "", error);
        }
    }

    if let Some(dir) = &report.archive_dir {
        let copied = report.archives.iter().filter(|a| a.is_copied()).count();
        println!("\nArchived {} of {} artifact(s) into {:?}", copied, report.archives.len(), dir);
    }
}

fn describe_action(action: &VariantAction) -> String {
    match action {
        VariantAction::Skipped => "skipped (debug)".to_string(),
        VariantAction::ManifestPatched { operations, .. } => {
            format!("manifest stamped ({})", describe_ops(operations))
        }
        VariantAction::ManifestSkipped { reason } => format!("manifest skipped: {}", reason),
        VariantAction::VersionBumped {
            previous,
            build_number,
        } => format!("version {} -> {}.{}", previous, previous, build_number),
        VariantAction::Unchanged => "unchanged".to_string(),
        VariantAction::Failed { reason } => format!("FAILED: {}", reason),
    }
}

fn describe_ops(ops: &[PatchOp]) -> String {
    ops.iter()
        .map(|op| match op {
            PatchOp::Replace { name, .. } => format!("replaced {}", name),
            PatchOp::Insert { name } => format!("inserted {}", name),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Show which markets are not declared as flavors yet
fn cmd_markets(
    resolver: &ConfigResolver,
    market: Option<PathBuf>,
    existing: Vec<String>,
) -> Result<()> {
    let options = resolver.packer_options(&CliOverrides {
        market,
        ..CliOverrides::default()
    });
    let existing: BTreeSet<String> = existing.into_iter().collect();

    match expand_markets(options.market_file.as_deref(), &existing)? {
        None => println!("No market file found; variants would get build numbers instead."),
        Some(expansion) if !expansion.markets_found() => {
            println!("Market file lists no markets.")
        }
        Some(expansion) => {
            println!("Found {} market(s):", expansion.markets.len());
            for market in &expansion.markets {
                let marker = if existing.contains(market) { " " } else { "+" };
                println!("  {} {}", marker, market);
            }
            println!("\n{} new flavor(s)", expansion.new_flavors.len());
        }
    }
    Ok(())
}

/// Render a name template
fn cmd_name(
    resolver: &ConfigResolver,
    template: Option<String>,
    vars: &NameVariables,
    bare: bool,
) -> Result<String> {
    let source = resolver.resolve(
        template,
        |c| c.packer.archive_name_format.clone(),
        flavorpack_sdk::DEFAULT_NAME_TEMPLATE.to_string(),
    );
    let template = NameTemplate::parse(&source)?;
    let now = naming::now();
    let name = if bare {
        template.render_at(vars, now)?
    } else {
        template.archive_file_name(vars, now)?
    };
    Ok(name)
}

/// Increment one build number
fn cmd_bump(store: &Path, version_name: &str, build_type: &str, dry_run: bool) -> Result<u64> {
    let key = counter_key(version_name, build_type);
    let value = if dry_run {
        let mut counter = MemoryCounterStore::seeded_from(store)?;
        let value = counter.increment(&key)?;
        println!("[dry-run] {}={} (not written to {:?})", key, value, store);
        value
    } else {
        let mut counter = FileCounterStore::load(store)?;
        let value = counter.increment(&key)?;
        println!("{}={}", key, value);
        value
    };
    Ok(value)
}

/// Stamp a single manifest
fn cmd_patch_manifest(
    resolver: &ConfigResolver,
    manifest: &Path,
    value: &str,
    matchers: Vec<String>,
    dry_run: bool,
) -> Result<Vec<PatchOp>> {
    let matchers = if matchers.is_empty() {
        resolver
            .config
            .as_ref()
            .map(|c| c.packer.manifest_matcher.clone())
            .unwrap_or_default()
    } else {
        matchers
    };
    if matchers.is_empty() {
        bail!("no metadata names to stamp; pass --matcher or set packer.manifest_matcher");
    }

    let ops = if dry_run {
        let mut doc = ManifestDocument::load(manifest)?;
        let ops = doc.patch(&matchers, value)?;
        println!("[dry-run] Would write {:?}:\n", manifest);
        println!("{}", doc.to_xml());
        ops
    } else {
        patch_manifest_file(manifest, &matchers, value)
            .with_context(|| format!("Failed to patch manifest {:?}", manifest))?
    };

    println!("{}: {}", manifest.display(), describe_ops(&ops));
    Ok(ops)
}
