//! Manifest channel stamping.
//!
//! Each flavored variant records its channel in the application manifest as
//! a `<meta-data>` entry, so the app can report where it was distributed:
//!
//! ```xml
//! <application>
//!     <meta-data android:name="UMENG_CHANNEL" android:value="google" />
//! </application>
//! ```
//!
//! The manifest is parsed into an explicit [`tree::Document`]. Patching is a
//! sequence of [`PatchOp`]s: `Replace` when an entry with the exact name
//! exists, `Insert` otherwise. The configured "matcher" names are compared
//! by string equality; there is no glob or regex matching.

pub mod patch;
pub mod tree;

pub use patch::{ANDROID_NAMESPACE, ManifestDocument, MetaData, PatchOp, patch_manifest_file};
pub use tree::{Attribute, Document, Element, Node, QName};
