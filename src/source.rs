//! Source resolution: turning an [`ImageReference`] into a [`SourceImage`].
//!
//! A reference is either a content-item id, looked up through a
//! [`ContentRepository`], or a direct URL, mapped onto the document root.
//!
//! ```text
//! Item(42)  → repository → uploads/2014/05/sunset.jpg  (+ stored url, size)
//! Url("http://example.com/uploads/2014/05/sunset.jpg")
//!           → <document_root>/uploads/2014/05/sunset.jpg (size probed from header)
//! ```
//!
//! ## Library file
//!
//! [`LibraryRepository`] reads a JSON library, normally produced by the
//! `index` command ([`build_library`]):
//!
//! ```json
//! { "items": [
//!   { "id": 1, "path": "uploads/sunset.jpg",
//!     "url": "http://example.com/uploads/sunset.jpg",
//!     "width": 2000, "height": 1000 }
//! ] }
//! ```
//!
//! Relative paths are resolved against the document root.

use crate::cache::source_of_variant;
use crate::imaging::{Dimensions, ImageBackend, is_supported_image};
use crate::resolve::ResolveError;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Duplicate item id {0} in library")]
    DuplicateId(ItemId),
    #[error("Invalid site URL {0}")]
    SiteUrl(String),
}

/// Opaque content-item identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which source image a caller means.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageReference {
    Item(ItemId),
    Url(String),
}

impl ImageReference {
    /// Build a reference from optional parts; exactly one must be present.
    pub fn from_parts(id: Option<ItemId>, url: Option<String>) -> Result<Self, ResolveError> {
        match (id, url) {
            (Some(id), None) => Ok(Self::Item(id)),
            (None, Some(url)) if !url.trim().is_empty() => Ok(Self::Url(url)),
            (None, Some(_)) => Err(ResolveError::InvalidReference("empty URL".into())),
            (Some(_), Some(_)) => Err(ResolveError::InvalidReference(
                "give either an item id or a URL, not both".into(),
            )),
            (None, None) => Err(ResolveError::InvalidReference(
                "no item id or URL given".into(),
            )),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Item(id) => write!(f, "item {}", id),
            Self::Url(url) => f.write_str(url),
        }
    }
}

/// What the content repository knows about an item's full-size image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredItem {
    /// Stored file path; relative paths hang off the document root.
    pub path: PathBuf,
    /// Public URL of the full-size file.
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// A resolved source image. Immutable for the rest of the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub path: PathBuf,
    pub original: Dimensions,
    pub url: String,
}

/// Narrow view of the host content store.
pub trait ContentRepository: Sync {
    fn resolve_item(&self, id: ItemId) -> Option<StoredItem>;
}

/// HashMap-backed repository for embedding and tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRepository {
    items: HashMap<ItemId, StoredItem>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ItemId, item: StoredItem) {
        self.items.insert(id, item);
    }

    pub fn with_item(mut self, id: u64, item: StoredItem) -> Self {
        self.insert(ItemId(id), item);
        self
    }
}

impl ContentRepository for InMemoryRepository {
    fn resolve_item(&self, id: ItemId) -> Option<StoredItem> {
        self.items.get(&id).cloned()
    }
}

/// One row of the library file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub id: ItemId,
    #[serde(flatten)]
    pub item: StoredItem,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryFile {
    items: Vec<LibraryEntry>,
}

/// Repository backed by a JSON library file.
#[derive(Debug, Default, Clone)]
pub struct LibraryRepository {
    inner: InMemoryRepository,
}

impl LibraryRepository {
    /// Load a library file. Duplicate ids are rejected.
    pub fn load(path: &Path) -> Result<Self, LibraryError> {
        let content = std::fs::read_to_string(path)?;
        let file: LibraryFile = serde_json::from_str(&content)?;
        Self::from_entries(file.items)
    }

    /// Load `path` if it exists, otherwise start empty.
    pub fn load_or_empty(path: &Path) -> Result<Self, LibraryError> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "no library file, starting empty");
            Ok(Self::default())
        }
    }

    pub fn from_entries(entries: Vec<LibraryEntry>) -> Result<Self, LibraryError> {
        let mut inner = InMemoryRepository::new();
        for entry in entries {
            if inner.items.contains_key(&entry.id) {
                return Err(LibraryError::DuplicateId(entry.id));
            }
            inner.insert(entry.id, entry.item);
        }
        Ok(Self { inner })
    }

    pub fn len(&self) -> usize {
        self.inner.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.is_empty()
    }
}

impl ContentRepository for LibraryRepository {
    fn resolve_item(&self, id: ItemId) -> Option<StoredItem> {
        self.inner.resolve_item(id)
    }
}

/// Write a library file.
pub fn save_library(path: &Path, entries: &[LibraryEntry]) -> Result<(), LibraryError> {
    let file = LibraryFile {
        items: entries.to_vec(),
    };
    let json = serde_json::to_string_pretty(&file)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Walk the document root and build library entries for every source image.
///
/// Hidden files, unsupported extensions, and derived variants whose source
/// sits next to them (see [`source_of_variant`]) are skipped. Ids are
/// assigned from 1 in path order.
/// Files whose header cannot be read are logged and left out.
pub fn build_library(
    document_root: &Path,
    site_url: &str,
    backend: &impl ImageBackend,
) -> Result<Vec<LibraryEntry>, LibraryError> {
    let base = parse_site_url(site_url)?;
    let mut entries = Vec::new();
    let walker = WalkDir::new(document_root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_supported_image(entry.path()) {
            continue;
        }
        if source_of_variant(entry.path(), backend).is_some() {
            continue;
        }
        let dims = match backend.identify(entry.path()) {
            Ok(dims) => dims,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "skipping unreadable image");
                continue;
            }
        };
        let relative = entry
            .path()
            .strip_prefix(document_root)
            .unwrap_or(entry.path())
            .to_path_buf();
        let url = join_url(&base, &relative);
        entries.push(LibraryEntry {
            id: ItemId(entries.len() as u64 + 1),
            item: StoredItem {
                path: relative,
                url,
                width: dims.width,
                height: dims.height,
            },
        });
    }
    Ok(entries)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|s| s.starts_with('.'))
}

fn parse_site_url(site_url: &str) -> Result<url::Url, LibraryError> {
    let url = url::Url::parse(site_url)
        .map_err(|e| LibraryError::SiteUrl(format!("{}: {}", site_url, e)))?;
    if url.cannot_be_a_base() {
        return Err(LibraryError::SiteUrl(format!(
            "{}: URL cannot carry a path",
            site_url
        )));
    }
    Ok(url)
}

/// Append the components of `relative` to `base` as encoded path segments.
fn join_url(base: &url::Url, relative: &Path) -> String {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .extend(relative.components().map(|c| c.as_os_str().to_string_lossy()));
    }
    url.into()
}

/// Map a URL (absolute, or a bare `/path`) onto a file under `document_root`.
///
/// Scheme, host, query and fragment are dropped and each path segment is
/// percent-decoded, so `my%20photo.jpg` and `my photo.jpg` name the same
/// file. Paths that would climb out of the document root are rejected.
pub fn url_to_path(url: &str, document_root: &Path) -> Result<PathBuf, ResolveError> {
    let trimmed = url.trim();
    let path = if trimmed.starts_with('/') && !trimmed.starts_with("//") {
        let end = trimmed
            .find(|c| c == '?' || c == '#')
            .unwrap_or(trimmed.len());
        trimmed[..end].to_string()
    } else {
        let absolute = if trimmed.starts_with("//") {
            format!("http:{}", trimmed)
        } else {
            trimmed.to_string()
        };
        let parsed = url::Url::parse(&absolute)
            .map_err(|e| ResolveError::InvalidReference(format!("{}: {}", trimmed, e)))?;
        if parsed.cannot_be_a_base() {
            return Err(ResolveError::InvalidReference(format!(
                "{}: URL has no path",
                trimmed
            )));
        }
        parsed.path().to_string()
    };

    let invalid = |reason: &str| ResolveError::InvalidReference(format!("{}: {}", trimmed, reason));
    let mut resolved = document_root.to_path_buf();
    let mut segments = 0;
    for raw in path.split('/') {
        let segment = percent_decode_str(raw)
            .decode_utf8()
            .map_err(|_| invalid("path is not valid UTF-8"))?;
        match &*segment {
            "" | "." => continue,
            ".." => return Err(invalid("path leaves the document root")),
            s if s.contains(['/', '\\', '\0']) => {
                return Err(invalid("encoded separator in path"));
            }
            s => {
                resolved.push(s);
                segments += 1;
            }
        }
    }
    if segments == 0 {
        return Err(invalid("URL has no file path"));
    }
    Ok(resolved)
}

/// Resolve a reference to its source file, public URL and original size.
pub fn resolve_source(
    reference: &ImageReference,
    repository: &impl ContentRepository,
    document_root: &Path,
    backend: &impl ImageBackend,
) -> Result<SourceImage, ResolveError> {
    match reference {
        ImageReference::Item(id) => {
            let item = repository
                .resolve_item(*id)
                .ok_or(ResolveError::SourceNotFound(*id))?;
            let path = if item.path.is_absolute() {
                item.path
            } else {
                document_root.join(item.path)
            };
            Ok(SourceImage {
                path,
                original: Dimensions::new(item.width, item.height),
                url: item.url,
            })
        }
        ImageReference::Url(url) => {
            let path = url_to_path(url, document_root)?;
            if !path.is_file() {
                return Err(ResolveError::SourceFileMissing(path));
            }
            let original = backend
                .identify(&path)
                .map_err(|source| ResolveError::DimensionProbeFailure {
                    path: path.clone(),
                    source,
                })?;
            Ok(SourceImage {
                path,
                original,
                url: url.trim().to_string(),
            })
        }
    }
}
