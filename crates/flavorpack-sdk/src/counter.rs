//! Persistent build-number counters.
//!
//! Build numbers are kept in a flat properties file with one `key=value`
//! line per counter. A key scopes a sequence to one version string and one
//! build type (see [`counter_key`]), so releasing a new version starts a
//! fresh sequence.
//!
//! ```text
//! #flavorpack build numbers
//! 2.0.release.build=2
//! 2.1.beta.build=14
//! ```
//!
//! Every increment rewrites the whole file before returning. A crash between
//! increments loses at most the latest one and never leaves a half-written
//! store behind, because the new contents go to a sibling temporary file that
//! is renamed over the original.
//!
//! Keys are escaped the way Java properties files escape them: `\`, `=`
//! and `:` get a leading backslash, as does a leading `#` or `!`, so any
//! version string round-trips.
//!
//! There is no locking: the store assumes it is owned by a single build
//! process for the duration of a run.
//!
//! ## Implementations
//!
//! | Type | Backing | Use |
//! |------|---------|-----|
//! | [`FileCounterStore`] | properties file | real builds |
//! | [`LazyCounterStore`] | properties file, opened on first increment | `flavorpack process` |
//! | [`MemoryCounterStore`] | `BTreeMap` | tests and dry runs |

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::PackError;

const STORE_HEADER: &str = "#flavorpack build numbers";

/// Builds the counter key for a version/build type pair.
///
/// ```
/// use flavorpack_sdk::counter::counter_key;
///
/// assert_eq!(counter_key("2.0", "release"), "2.0.release.build");
/// ```
pub fn counter_key(version_name: &str, build_type: &str) -> String {
    format!("{}.{}.build", version_name, build_type)
}

/// A source of monotonically increasing build numbers.
///
/// The orchestrator only depends on this trait, so a test or a dry run can
/// hand it a [`MemoryCounterStore`] instead of touching the real file.
pub trait BuildCounter {
    /// Returns the current value for `key`, `0` when the key is unknown.
    fn current(&self, key: &str) -> u64;

    /// Adds one to the counter for `key` and returns the new value.
    ///
    /// File-backed implementations persist the whole store before returning.
    fn increment(&mut self, key: &str) -> Result<u64, PackError>;
}

/// Counter store backed by a properties file.
#[derive(Debug, Clone)]
pub struct FileCounterStore {
    path: PathBuf,
    counters: BTreeMap<String, u64>,
}

impl FileCounterStore {
    /// Loads the store at `path`.
    ///
    /// A missing file is created empty (parent directories included) and
    /// yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::CounterStore`] if the file cannot be read or
    /// created, or if it contains a value that is not a non-negative integer.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PackError> {
        let path = path.into();
        let counters = if path.exists() {
            read_counters(&path)?
        } else {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent).map_err(|e| {
                    PackError::CounterStore(format!(
                        "Failed to create directory {} for the build number store: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
            fs::write(&path, "").map_err(|e| {
                PackError::CounterStore(format!(
                    "Failed to create build number store at {}: {}",
                    path.display(),
                    e
                ))
            })?;
            tracing::debug!(path = %path.display(), "created empty build number store");
            BTreeMap::new()
        };

        Ok(Self { path, counters })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All counters, sorted by key.
    pub fn entries(&self) -> &BTreeMap<String, u64> {
        &self.counters
    }

    fn persist(&self) -> Result<(), PackError> {
        let contents = render_counters(&self.counters);
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, contents)
            .and_then(|()| fs::rename(&tmp_path, &self.path))
            .map_err(|e| {
                if tmp_path.exists() {
                    let _ = fs::remove_file(&tmp_path);
                }
                PackError::CounterStore(format!(
                    "Failed to write build number store {}: {}\n\n\
                     The build number was not committed; fix the path or permissions and rebuild.",
                    self.path.display(),
                    e
                ))
            })
    }
}

impl BuildCounter for FileCounterStore {
    fn current(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    fn increment(&mut self, key: &str) -> Result<u64, PackError> {
        let next = next_value(self.current(key), key)?;
        let previous = self.counters.insert(key.to_string(), next);
        if let Err(e) = self.persist() {
            match previous {
                Some(value) => self.counters.insert(key.to_string(), value),
                None => self.counters.remove(key),
            };
            return Err(e);
        }
        tracing::debug!(key, value = next, "build number persisted");
        Ok(next)
    }
}

/// File-backed store that is only opened when a build number is needed.
///
/// Runs that never increment (markets present, auto-increment off, an
/// explicit build number) leave the filesystem untouched.
#[derive(Debug, Clone)]
pub struct LazyCounterStore {
    path: PathBuf,
    store: Option<FileCounterStore>,
}

impl LazyCounterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            store: None,
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the backing file has been opened.
    pub fn is_open(&self) -> bool {
        self.store.is_some()
    }

    fn open(&mut self) -> Result<&mut FileCounterStore, PackError> {
        let store = match self.store.take() {
            Some(store) => store,
            None => FileCounterStore::load(&self.path)?,
        };
        Ok(self.store.insert(store))
    }
}

impl BuildCounter for LazyCounterStore {
    fn current(&self, key: &str) -> u64 {
        match &self.store {
            Some(store) => store.current(key),
            None => MemoryCounterStore::seeded_from(&self.path)
                .map(|store| store.current(key))
                .unwrap_or(0),
        }
    }

    fn increment(&mut self, key: &str) -> Result<u64, PackError> {
        self.open()?.increment(key)
    }
}

/// Counter store that never touches the filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemoryCounterStore {
    counters: BTreeMap<String, u64>,
}

impl MemoryCounterStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an in-memory store from an existing properties file.
    ///
    /// Unlike [`FileCounterStore::load`], a missing file is not created.
    pub fn seeded_from(path: &Path) -> Result<Self, PackError> {
        let counters = if path.exists() {
            read_counters(path)?
        } else {
            BTreeMap::new()
        };
        Ok(Self { counters })
    }
}

impl BuildCounter for MemoryCounterStore {
    fn current(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    fn increment(&mut self, key: &str) -> Result<u64, PackError> {
        let next = next_value(self.current(key), key)?;
        self.counters.insert(key.to_string(), next);
        Ok(next)
    }
}

fn next_value(current: u64, key: &str) -> Result<u64, PackError> {
    current.checked_add(1).ok_or_else(|| {
        PackError::CounterStore(format!(
            "build number for '{}' is already at the maximum ({})",
            key, current
        ))
    })
}

fn read_counters(path: &Path) -> Result<BTreeMap<String, u64>, PackError> {
    let contents = fs::read_to_string(path).map_err(|e| {
        PackError::CounterStore(format!(
            "Failed to read build number store {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_counters(&contents).map_err(|(line, reason)| {
        PackError::CounterStore(format!("{}:{}: {}", path.display(), line, reason))
    })
}

/// Parses properties text. Errors carry the 1-based line number.
fn parse_counters(contents: &str) -> Result<BTreeMap<String, u64>, (usize, String)> {
    let mut counters = BTreeMap::new();
    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let Some((key, value)) = split_entry(line) else {
            return Err((index + 1, format!("expected key=value, found '{}'", line)));
        };
        let value = value.trim();
        let value = value.parse::<u64>().map_err(|_| {
            (
                index + 1,
                format!("value for '{}' is not a build number: '{}'", key, value),
            )
        })?;
        counters.insert(key, value);
    }
    Ok(counters)
}

/// Splits at the first unescaped `=` or `:`, unescaping the key.
fn split_entry(line: &str) -> Option<(String, &str)> {
    let mut key = String::new();
    let mut escaped_len = 0;
    let mut chars = line.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, next)) = chars.next() {
                    key.push(next);
                    escaped_len = key.len();
                }
            }
            '=' | ':' => {
                let keep = key.trim_end().len().max(escaped_len);
                key.truncate(keep);
                return Some((key, &line[i + 1..]));
            }
            _ => key.push(c),
        }
    }
    None
}

fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, c) in key.chars().enumerate() {
        match c {
            '\\' | '=' | ':' => out.push('\\'),
            '#' | '!' if i == 0 => out.push('\\'),
            _ => {}
        }
        out.push(c);
    }
    out
}

fn render_counters(counters: &BTreeMap<String, u64>) -> String {
    let mut out = String::from(STORE_HEADER);
    out.push('\n');
    for (key, value) in counters {
        out.push_str(&escape_key(key));
        out.push('=');
        out.push_str(&value.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_creates_it() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/flavorpack.properties");

        let store = FileCounterStore::load(&path).unwrap();

        assert!(path.is_file());
        assert!(store.entries().is_empty());
    }

    #[test]
    fn test_increment_persists_each_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flavorpack.properties");
        let key = counter_key("2.0", "release");

        let mut store = FileCounterStore::load(&path).unwrap();
        assert_eq!(store.increment(&key).unwrap(), 1);
        assert_eq!(FileCounterStore::load(&path).unwrap().current(&key), 1);

        assert_eq!(store.increment(&key).unwrap(), 2);
        assert_eq!(FileCounterStore::load(&path).unwrap().current(&key), 2);
    }

    #[test]
    fn test_counters_are_independent_per_key() {
        let mut store = MemoryCounterStore::new();
        assert_eq!(store.increment("1.0.release.build").unwrap(), 1);
        assert_eq!(store.increment("1.0.release.build").unwrap(), 2);
        assert_eq!(store.increment("1.1.release.build").unwrap(), 1);
        assert_eq!(store.current("1.0.beta.build"), 0);
    }

    #[test]
    fn test_persisted_file_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flavorpack.properties");
        let mut store = FileCounterStore::load(&path).unwrap();
        store.increment("b.release.build").unwrap();
        store.increment("a.release.build").unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "#flavorpack build numbers\na.release.build=1\nb.release.build=1\n"
        );
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_parse_accepts_comments_and_colon_separator() {
        let counters = parse_counters(
            "#Tue Oct 14 10:00:00 CST 2025\n! legacy\n\n1.0.release.build = 4\n1.1.beta.build:9\n",
        )
        .unwrap();
        assert_eq!(counters.get("1.0.release.build"), Some(&4));
        assert_eq!(counters.get("1.1.beta.build"), Some(&9));
    }

    #[test]
    fn test_parse_rejects_non_numeric_value() {
        let err = parse_counters("1.0.release.build=abc\n").unwrap_err();
        assert_eq!(err.0, 1);
        assert!(err.1.contains("not a build number"));
    }

    #[test]
    fn test_load_reports_malformed_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flavorpack.properties");
        fs::write(&path, "#header\nno separator here\n").unwrap();

        let err = FileCounterStore::load(&path).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains(":2:"), "unexpected message: {}", msg);
    }

    #[test]
    fn test_keys_with_separators_survive_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flavorpack.properties");
        let colon = counter_key("1.0:rc", "release");
        let equals = counter_key("1.0=rc", "release");
        let hash = counter_key("#1\\x", "beta");

        let mut store = FileCounterStore::load(&path).unwrap();
        store.increment(&colon).unwrap();
        store.increment(&colon).unwrap();
        store.increment(&equals).unwrap();
        store.increment(&hash).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("1.0\\:rc.release.build=2\n"), "{}", contents);

        let reloaded = FileCounterStore::load(&path).unwrap();
        assert_eq!(reloaded.current(&colon), 2);
        assert_eq!(reloaded.current(&equals), 1);
        assert_eq!(reloaded.current(&hash), 1);
        assert_eq!(reloaded.entries().len(), 3);
    }

    #[test]
    fn test_increment_at_maximum_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flavorpack.properties");
        fs::write(&path, format!("2.0.release.build={}\n", u64::MAX)).unwrap();

        let mut store = FileCounterStore::load(&path).unwrap();
        let err = store.increment("2.0.release.build").unwrap_err();
        assert!(matches!(err, PackError::CounterStore(_)));
        assert_eq!(store.current("2.0.release.build"), u64::MAX);

        let mut memory = MemoryCounterStore::seeded_from(&path).unwrap();
        assert!(memory.increment("2.0.release.build").is_err());
    }

    #[test]
    fn test_failed_persist_rolls_back_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flavorpack.properties");
        let mut store = FileCounterStore::load(&path).unwrap();
        store.increment("1.0.release.build").unwrap();

        // A directory at the temp path makes the write fail.
        fs::create_dir(path.with_extension("tmp")).unwrap();
        assert!(store.increment("1.0.release.build").is_err());
        assert!(store.increment("1.1.release.build").is_err());
        assert_eq!(store.current("1.0.release.build"), 1);
        assert!(!store.entries().contains_key("1.1.release.build"));

        fs::remove_dir(path.with_extension("tmp")).unwrap();
        assert_eq!(store.increment("1.0.release.build").unwrap(), 2);
    }

    #[test]
    fn test_failed_persist_removes_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flavorpack.properties");
        let mut store = FileCounterStore::load(&path).unwrap();

        // A directory at the store path makes the rename fail after the
        // temp file was written.
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "").unwrap();

        assert!(store.increment("1.0.release.build").is_err());
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(store.current("1.0.release.build"), 0);
    }

    #[test]
    fn test_lazy_store_creates_file_on_first_increment() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/flavorpack.properties");

        let mut store = LazyCounterStore::new(&path);
        assert_eq!(store.current("1.0.release.build"), 0);
        assert!(!store.is_open());
        assert!(!path.exists());

        assert_eq!(store.increment("1.0.release.build").unwrap(), 1);
        assert!(store.is_open());
        assert_eq!(FileCounterStore::load(&path).unwrap().current("1.0.release.build"), 1);
    }

    #[test]
    fn test_lazy_store_reads_existing_values_before_opening() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flavorpack.properties");
        fs::write(&path, "1.0.release.build=7\n").unwrap();

        let mut store = LazyCounterStore::new(&path);
        assert_eq!(store.current("1.0.release.build"), 7);
        assert_eq!(store.increment("1.0.release.build").unwrap(), 8);
    }

    #[test]
    fn test_memory_store_seeded_from_missing_file_does_not_create_it() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.properties");

        let store = MemoryCounterStore::seeded_from(&path).unwrap();

        assert_eq!(store.current("x"), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_memory_store_seeded_from_file_continues_sequence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("flavorpack.properties");
        fs::write(&path, "3.0.release.build=41\n").unwrap();

        let mut store = MemoryCounterStore::seeded_from(&path).unwrap();

        assert_eq!(store.increment("3.0.release.build").unwrap(), 42);
        assert_eq!(fs::read_to_string(&path).unwrap(), "3.0.release.build=41\n");
    }
}
