//! Configuration file support for flavorpack.
//!
//! This module provides support for `flavorpack.toml` configuration files so
//! that packer options live next to the project instead of on every command
//! line.
//!
//! ## Configuration File Location
//!
//! The configuration file is searched for in the following order:
//! 1. The path given with `--config`
//! 2. Current working directory (`./flavorpack.toml`)
//! 3. Parent directories (up to the repository root or filesystem root)
//!
//! ## Example Configuration
//!
//! ```toml
//! [project]
//! descriptor = "flavorpack.yaml"
//! counter_store = "flavorpack.properties"
//!
//! [packer]
//! archive_output = "build/archives"
//! archive_name_format = "${appPkg}-${flavorName}-${buildType}-v${versionName}-${versionCode}"
//! manifest_matcher = ["UMENG_CHANNEL"]
//! build_number_auto = true
//! build_number_type_matcher = ["release"]
//!
//! [properties]
//! market = "markets.txt"
//! ```
//!
//! Relative paths are resolved against the project root: `[project] root`
//! when set, otherwise the directory containing the configuration file.

use anyhow::{Context, Result};
use flavorpack_sdk::PackerOptions;
use flavorpack_sdk::project::resolve_against;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// The default configuration file name.
pub const CONFIG_FILE_NAME: &str = "flavorpack.toml";

/// Default project descriptor, relative to the project root.
pub const DEFAULT_DESCRIPTOR: &str = "flavorpack.yaml";

/// Default build number store, relative to the project root.
pub const DEFAULT_COUNTER_STORE: &str = "flavorpack.properties";

/// Root configuration structure for `flavorpack.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlavorpackConfig {
    /// Where the project and its state live.
    pub project: ProjectConfig,

    /// Packer extension options.
    pub packer: PackerConfig,

    /// Host properties, normally passed on the command line.
    pub properties: PropertiesConfig,
}

/// Project-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project root. Defaults to the directory of the configuration file.
    pub root: Option<PathBuf>,

    /// Project descriptor (YAML or JSON).
    ///
    /// Defaults to `flavorpack.yaml`.
    pub descriptor: Option<PathBuf>,

    /// Build number store.
    ///
    /// Defaults to `flavorpack.properties`.
    pub counter_store: Option<PathBuf>,
}

/// Packer extension options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackerConfig {
    /// Archive directory. Defaults to `build/archives`.
    pub archive_output: Option<PathBuf>,

    /// Archive name template.
    pub archive_name_format: Option<String>,

    /// Metadata names stamped with the flavor name.
    pub manifest_matcher: Vec<String>,

    /// Append an auto-incremented build number when no markets exist.
    pub build_number_auto: bool,

    /// Build types eligible for auto-increment. Unset means all types.
    pub build_number_type_matcher: Option<Vec<String>>,
}

/// Host properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertiesConfig {
    /// Overrides `packer.archive_output`.
    pub output: Option<PathBuf>,

    /// Market list file.
    pub market: Option<PathBuf>,

    /// Explicit build number.
    pub build_num: Option<String>,
}

impl FlavorpackConfig {
    /// Loads configuration from the specified file path.
    ///
    /// # Returns
    ///
    /// * `Ok(FlavorpackConfig)` - Successfully loaded configuration
    /// * `Err` - If the file cannot be read or parsed
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: FlavorpackConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Attempts to find and load configuration from the current directory
    /// or any parent directory.
    pub fn discover() -> Result<Option<(Self, PathBuf)>> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&cwd)
    }

    /// Attempts to find and load configuration starting from the specified directory.
    ///
    /// # Returns
    ///
    /// * `Ok(Some((config, path)))` - Found and loaded configuration with its path
    /// * `Ok(None)` - No configuration file found
    /// * `Err` - If a config file was found but couldn't be parsed
    pub fn discover_from(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.is_file() {
                let config = Self::load_from_file(&config_path)?;
                return Ok(Some((config, config_path)));
            }

            // Stop at repository root or filesystem root
            if current.join(".git").exists() || !current.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Saves the configuration to the specified file path.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Generates a starter configuration file as a formatted TOML string.
    ///
    /// `descriptor` is written as the project descriptor path.
    pub fn generate_starter_toml(descriptor: &str) -> String {
        format!(
            r#"# flavorpack configuration file
# CLI flags override these settings when provided.

[project]
# Project descriptor listing flavors and built variants (YAML or JSON)
descriptor = "{descriptor}"

# Build number store (default: flavorpack.properties)
# counter_store = "flavorpack.properties"

[packer]
# Directory the archives are copied into; emptied on every run
archive_output = "build/archives"

# Archive name template. Variables: appName, projectName, flavorName,
# buildType, versionName, versionCode, appPkg, buildTime
archive_name_format = "{template}"

# <meta-data> names stamped with the flavor name when markets exist
manifest_matcher = ["UMENG_CHANNEL"]

# Append an auto-incremented build number when no markets exist
build_number_auto = false

# Build types eligible for auto-increment (default: all)
# build_number_type_matcher = ["release"]

[properties]
# Market list, one market per line, '#' starts a comment
# market = "markets.txt"

# Explicit build number (also --build-num / FLAVORPACK_BUILD_NUM)
# build_num = "100"
"#,
            descriptor = descriptor,
            template = flavorpack_sdk::DEFAULT_NAME_TEMPLATE,
        )
    }
}

/// Values taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub descriptor: Option<PathBuf>,
    pub counter_store: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub market: Option<PathBuf>,
    pub build_num: Option<String>,
    pub archive_name_format: Option<String>,
    pub dry_run: bool,
}

/// Configuration resolver that merges config file values with CLI arguments.
///
/// CLI arguments always take precedence over config file values.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    /// Loaded configuration, if any.
    pub config: Option<FlavorpackConfig>,

    /// Path to the loaded config file, if any.
    pub config_path: Option<PathBuf>,

    /// Directory relative paths are resolved against.
    pub root: PathBuf,
}

impl ConfigResolver {
    /// Loads `explicit` when given, otherwise discovers `flavorpack.toml`.
    ///
    /// Without a config file the project root is the current directory.
    pub fn new(explicit: Option<&Path>) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let found = match explicit {
            Some(path) => Some((FlavorpackConfig::load_from_file(path)?, path.to_path_buf())),
            None => FlavorpackConfig::discover()?,
        };
        Ok(Self::from_parts(found, &cwd))
    }

    /// Builds a resolver from an already loaded configuration.
    pub fn from_parts(found: Option<(FlavorpackConfig, PathBuf)>, cwd: &Path) -> Self {
        match found {
            Some((config, path)) => {
                let config_dir = path
                    .parent()
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .map(|dir| resolve_against(cwd, dir))
                    .unwrap_or_else(|| cwd.to_path_buf());
                let root = config
                    .project
                    .root
                    .as_deref()
                    .map(|root| resolve_against(&config_dir, root))
                    .unwrap_or(config_dir);
                Self {
                    config: Some(config),
                    config_path: Some(path),
                    root,
                }
            }
            None => Self {
                config: None,
                config_path: None,
                root: cwd.to_path_buf(),
            },
        }
    }

    /// Resolves a CLI value, using config as fallback.
    ///
    /// # Returns
    ///
    /// The resolved value, preferring CLI over config over default.
    pub fn resolve<T, F>(&self, cli_value: Option<T>, config_getter: F, default: T) -> T
    where
        F: FnOnce(&FlavorpackConfig) -> Option<T>,
    {
        cli_value
            .or_else(|| self.config.as_ref().and_then(config_getter))
            .unwrap_or(default)
    }

    /// Resolves `path` against the project root.
    pub fn path(&self, path: &Path) -> PathBuf {
        resolve_against(&self.root, path)
    }

    /// Project descriptor path.
    pub fn descriptor(&self, cli: Option<PathBuf>) -> PathBuf {
        let path = self.resolve(
            cli,
            |c| c.project.descriptor.clone(),
            PathBuf::from(DEFAULT_DESCRIPTOR),
        );
        self.path(&path)
    }

    /// Build number store path.
    pub fn counter_store(&self, cli: Option<PathBuf>) -> PathBuf {
        let path = self.resolve(
            cli,
            |c| c.project.counter_store.clone(),
            PathBuf::from(DEFAULT_COUNTER_STORE),
        );
        self.path(&path)
    }

    /// Merges CLI values, config file and defaults into packer options.
    ///
    /// `output` (CLI, then `[properties]`) wins over `[packer] archive_output`.
    pub fn packer_options(&self, cli: &CliOverrides) -> PackerOptions {
        let defaults = PackerOptions::default();
        let packer = self
            .config
            .as_ref()
            .map(|c| c.packer.clone())
            .unwrap_or_default();

        let archive_output = self.resolve(
            cli.output.clone(),
            |c| c.properties.output.clone().or_else(|| c.packer.archive_output.clone()),
            defaults.archive_output,
        );
        let properties = self.config.as_ref().map(|c| &c.properties);
        let market = cli
            .market
            .clone()
            .or_else(|| properties.and_then(|p| p.market.clone()));
        let build_num = cli
            .build_num
            .clone()
            .or_else(|| properties.and_then(|p| p.build_num.clone()));

        PackerOptions {
            archive_output: self.path(&archive_output),
            archive_name_format: cli.archive_name_format.clone().or(packer.archive_name_format),
            manifest_matcher: packer.manifest_matcher,
            build_number_auto: packer.build_number_auto,
            build_number_type_matcher: packer
                .build_number_type_matcher
                .map(|types| types.into_iter().collect::<BTreeSet<_>>()),
            market_file: market.map(|path| self.path(&path)),
            build_num,
            dry_run: cli.dry_run,
        }
    }
}
