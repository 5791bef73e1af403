//! Find-or-insert patching of `<meta-data>` entries.

use std::path::Path;

use serde::Serialize;

use super::tree::{Document, Element, QName};
use crate::types::PackError;

/// Namespace URI bound to the Android attribute prefix.
pub const ANDROID_NAMESPACE: &str = "http://schemas.android.com/apk/res/android";

const DEFAULT_ANDROID_PREFIX: &str = "android";
const APPLICATION: &str = "application";
const META_DATA: &str = "meta-data";

/// One applied change to the application element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
    /// An existing entry at `child_index` got a new value.
    Replace {
        name: String,
        child_index: usize,
        previous: String,
    },
    /// No entry existed; a new one was appended.
    Insert { name: String },
}

impl PatchOp {
    /// Metadata name the operation touched.
    pub fn name(&self) -> &str {
        match self {
            PatchOp::Replace { name, .. } | PatchOp::Insert { name } => name,
        }
    }
}

/// A name/value pair read from a `<meta-data>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaData {
    pub name: String,
    pub value: Option<String>,
}

/// The manifest of one variant, with the Android prefix resolved.
#[derive(Debug, Clone)]
pub struct ManifestDocument {
    document: Document,
    name_attr: QName,
    value_attr: QName,
}

impl ManifestDocument {
    /// Parses manifest XML.
    ///
    /// The Android prefix is taken from the root's `xmlns:*` declaration bound
    /// to [`ANDROID_NAMESPACE`], falling back to `android`.
    pub fn parse(xml: &str) -> Result<Self, PackError> {
        Ok(Self::from_document(Document::parse(xml)?))
    }

    /// Reads and parses the manifest at `path`.
    pub fn load(path: &Path) -> Result<Self, PackError> {
        Ok(Self::from_document(Document::load(path)?))
    }

    fn from_document(document: Document) -> Self {
        let prefix = document
            .root
            .attributes
            .iter()
            .find(|attr| {
                attr.name.prefix.as_deref() == Some("xmlns") && attr.value == ANDROID_NAMESPACE
            })
            .map(|attr| attr.name.local.clone())
            .unwrap_or_else(|| DEFAULT_ANDROID_PREFIX.to_string());

        Self {
            document,
            name_attr: QName::prefixed(prefix.clone(), "name"),
            value_attr: QName::prefixed(prefix, "value"),
        }
    }

    /// The underlying tree.
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Serializes the manifest.
    pub fn to_xml(&self) -> String {
        self.document.to_xml()
    }

    /// Writes the manifest to `path`.
    pub fn save(&self, path: &Path) -> Result<(), PackError> {
        self.document.save(path)
    }

    /// The application element: the root itself or its first `<application>` child.
    pub fn application(&self) -> Result<&Element, PackError> {
        let root = &self.document.root;
        if root.name.local == APPLICATION {
            return Ok(root);
        }
        root.find_child(APPLICATION).ok_or_else(missing_application)
    }

    fn application_mut(&mut self) -> Result<&mut Element, PackError> {
        let root = &mut self.document.root;
        if root.name.local == APPLICATION {
            return Ok(root);
        }
        let index = root
            .find_child_index(APPLICATION)
            .ok_or_else(missing_application)?;
        root.children[index]
            .as_element_mut()
            .ok_or_else(missing_application)
    }

    /// All `<meta-data>` entries of the application element, in document order.
    pub fn metadata(&self) -> Result<Vec<MetaData>, PackError> {
        let app = self.application()?;
        Ok(app
            .child_elements()
            .map(|(_, element)| element)
            .filter(|element| element.name.local == META_DATA)
            .filter_map(|element| {
                element.attribute(&self.name_attr).map(|name| MetaData {
                    name: name.to_string(),
                    value: element.attribute(&self.value_attr).map(str::to_string),
                })
            })
            .collect())
    }

    /// Finds the child index of the first `<meta-data>` named exactly `name`.
    fn find_metadata(&self, name: &str) -> Result<Option<usize>, PackError> {
        let app = self.application()?;
        Ok(app
            .child_elements()
            .find(|(_, element)| {
                element.name.local == META_DATA && element.attribute(&self.name_attr) == Some(name)
            })
            .map(|(index, _)| index))
    }

    /// Stamps `value` on every metadata name in `patterns`, in order.
    ///
    /// Matching is exact string equality on the `android:name` attribute; the
    /// first match is replaced, otherwise a new entry is appended. Each
    /// pattern sees the insertions of the patterns before it.
    ///
    /// # Example
    ///
    /// ```
    /// use flavorpack_sdk::manifest::{ManifestDocument, PatchOp};
    ///
    /// let mut doc = ManifestDocument::parse(
    ///     r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android"><application/></manifest>"#,
    /// )?;
    /// let ops = doc.patch(&["UMENG_CHANNEL".to_string()], "google")?;
    ///
    /// assert_eq!(ops, vec![PatchOp::Insert { name: "UMENG_CHANNEL".into() }]);
    /// assert_eq!(doc.metadata()?[0].value.as_deref(), Some("google"));
    /// # Ok::<(), flavorpack_sdk::PackError>(())
    /// ```
    pub fn patch(&mut self, patterns: &[String], value: &str) -> Result<Vec<PatchOp>, PackError> {
        let mut ops = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let op = match self.find_metadata(pattern)? {
                Some(child_index) => {
                    let value_attr = self.value_attr.clone();
                    let app = self.application_mut()?;
                    let element = app.children[child_index]
                        .as_element_mut()
                        .ok_or_else(missing_application)?;
                    let previous = element.attribute(&value_attr).unwrap_or_default().to_string();
                    element.set_attribute(value_attr, value);
                    PatchOp::Replace {
                        name: pattern.clone(),
                        child_index,
                        previous,
                    }
                }
                None => {
                    let entry = Element::new(QName::local(META_DATA))
                        .with_attribute(self.name_attr.clone(), pattern.as_str())
                        .with_attribute(self.value_attr.clone(), value);
                    self.application_mut()?.append_child_element(entry);
                    PatchOp::Insert {
                        name: pattern.clone(),
                    }
                }
            };
            tracing::debug!(?op, "manifest metadata patched");
            ops.push(op);
        }
        Ok(ops)
    }
}

/// Loads the manifest at `path`, patches it and writes it back in place.
///
/// # Errors
///
/// * [`PackError::Io`] - the file cannot be read or written
/// * [`PackError::Manifest`] - the XML is malformed or has no application element
pub fn patch_manifest_file(
    path: &Path,
    patterns: &[String],
    value: &str,
) -> Result<Vec<PatchOp>, PackError> {
    let mut doc = ManifestDocument::load(path)?;
    let ops = doc.patch(patterns, value)?;
    doc.save(path)?;
    tracing::info!(
        path = %path.display(),
        value,
        entries = ops.len(),
        "manifest stamped"
    );
    Ok(ops)
}

fn missing_application() -> PackError {
    PackError::Manifest("no <application> element found under the manifest root".to_string())
}
