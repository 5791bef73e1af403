//! Market list expansion.
//!
//! A market file lists one distribution channel per line. Anything after a
//! `#` on the same line is a comment:
//!
//! ```text
//! google#Play Store
//! baidu
//! # retired channels below
//! wandoujia
//! ```
//!
//! Every market becomes a build flavor. Expansion reports which markets the
//! project does not declare yet; whether *any* market was found decides how
//! the orchestrator treats each variant.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;

use crate::types::PackError;

/// Result of reading a market file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MarketExpansion {
    /// Every distinct market in file order.
    pub markets: Vec<String>,
    /// Markets that were not declared as flavors yet, in file order.
    pub new_flavors: Vec<String>,
}

impl MarketExpansion {
    /// Returns `true` if the file named at least one market.
    pub fn markets_found(&self) -> bool {
        !self.markets.is_empty()
    }
}

/// Reads the market file at `path` and diffs it against `existing` flavors.
///
/// # Returns
///
/// * `Ok(None)` - No market file is configured or the file does not exist
/// * `Ok(Some(expansion))` - The file was read (it may still be empty)
///
/// # Errors
///
/// Returns [`PackError::Io`] if the file exists but cannot be read.
///
/// # Example
///
/// ```no_run
/// use flavorpack_sdk::market::expand_markets;
/// use std::collections::BTreeSet;
/// use std::path::Path;
///
/// let existing: BTreeSet<String> = ["baidu".to_string()].into_iter().collect();
/// if let Some(expansion) = expand_markets(Some(Path::new("markets.txt")), &existing)? {
///     println!("new flavors: {:?}", expansion.new_flavors);
/// }
/// # Ok::<(), flavorpack_sdk::PackError>(())
/// ```
pub fn expand_markets(
    path: Option<&Path>,
    existing: &BTreeSet<String>,
) -> Result<Option<MarketExpansion>, PackError> {
    let Some(path) = path else {
        tracing::debug!("no market file configured");
        return Ok(None);
    };

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "market file not found, building without markets");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let expansion = expand_market_list(&contents, existing);
    tracing::info!(
        path = %path.display(),
        markets = expansion.markets.len(),
        new = expansion.new_flavors.len(),
        "market file read"
    );
    Ok(Some(expansion))
}

/// Parses market list text and diffs it against `existing` flavors.
///
/// ```
/// use flavorpack_sdk::market::expand_market_list;
/// use std::collections::BTreeSet;
///
/// let existing: BTreeSet<String> = ["baidu".to_string()].into_iter().collect();
/// let expansion = expand_market_list("google#notes here\nbaidu", &existing);
///
/// assert_eq!(expansion.markets, vec!["google", "baidu"]);
/// assert_eq!(expansion.new_flavors, vec!["google"]);
/// ```
pub fn expand_market_list(contents: &str, existing: &BTreeSet<String>) -> MarketExpansion {
    let mut seen = BTreeSet::new();
    let mut expansion = MarketExpansion::default();

    for line in contents.lines() {
        let Some(market) = parse_market_line(line) else {
            continue;
        };
        if !seen.insert(market.to_string()) {
            continue;
        }
        expansion.markets.push(market.to_string());
        if !existing.contains(market) {
            expansion.new_flavors.push(market.to_string());
        }
    }

    expansion
}

fn parse_market_line(line: &str) -> Option<&str> {
    let id = match line.split_once('#') {
        Some((id, _comment)) => id,
        None => line,
    }
    .trim();
    (!id.is_empty()).then_some(id)
}
