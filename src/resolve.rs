//! Variant resolution, the core of the crate.
//!
//! Given a source reference and a target box, decide which file to show and
//! make sure it exists:
//!
//! ```text
//! 1. resolve source          (item id → repository, URL → document root)
//! 2. fits already?           → original url + size, nothing written
//! 3. exact-box variant?      → cached, size = box
//! 4. fit-size variant? (fit) → cached, size = fitted size
//! 5. generate                → open, quality, resize, atomic save, probe
//! ```
//!
//! Steps 3–5 run again under a per-key lock (see [`crate::cache`]) so
//! concurrent callers asking for the same variant generate it once.
//!
//! Codec errors are never retried or replaced by a fallback image; they are
//! returned with the [`CodecStage`] that failed so callers can tell "cannot
//! open" from "cannot write".
//!
//! ## Filters
//!
//! Callers reshape returned descriptors by registering [`VariantFilter`]s at
//! construction, e.g. [`UrlRewrite`] to serve variants from a CDN. Filters run
//! in registration order on every descriptor, including untouched originals.

use crate::cache::{CacheStats, PathLocks, write_atomically};
use crate::config::{FULL_SIZE, ResolverConfig, SizePreset};
use crate::imaging::{
    BackendError, Dimensions, ImageBackend, ImageEditor, Quality, ResizeMode, fit_dimensions,
    needs_resize,
};
use crate::naming::{derived_path, substitute_basename};
use crate::source::{ContentRepository, ImageReference, ItemId, SourceImage, resolve_source};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Unknown image size: {0}")]
    UnknownSize(String),
    #[error("Source item not found: {0}")]
    SourceNotFound(ItemId),
    #[error("Source file missing: {}", .0.display())]
    SourceFileMissing(PathBuf),
    #[error("Cannot read dimensions of {}: {source}", path.display())]
    DimensionProbeFailure {
        path: PathBuf,
        #[source]
        source: BackendError,
    },
    #[error("Codec failed during {stage}: {source}")]
    Codec {
        stage: CodecStage,
        #[source]
        source: BackendError,
    },
}

/// Codec step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecStage {
    EditOpen,
    Resize,
    Save,
}

impl fmt::Display for CodecStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EditOpen => f.write_str("edit-open"),
            Self::Resize => f.write_str("resize"),
            Self::Save => f.write_str("save"),
        }
    }
}

fn codec(stage: CodecStage) -> impl FnOnce(BackendError) -> ResolveError {
    move |source| ResolveError::Codec { stage, source }
}

fn fitted(source: &SourceImage, request: &VariantRequest) -> Dimensions {
    fit_dimensions(source.original.as_tuple(), (request.width, request.height)).into()
}

/// Target box and mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantRequest {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub crop: bool,
}

impl VariantRequest {
    pub fn new(width: u32, height: u32, crop: bool) -> Self {
        Self {
            width,
            height,
            crop,
        }
    }

    pub fn fit(width: u32, height: u32) -> Self {
        Self::new(width, height, false)
    }

    pub fn crop(width: u32, height: u32) -> Self {
        Self::new(width, height, true)
    }

    pub fn mode(&self) -> ResizeMode {
        ResizeMode::from_crop(self.crop)
    }

    pub fn dims(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    fn validate(&self) -> Result<(), ResolveError> {
        if self.width == 0 || self.height == 0 {
            return Err(ResolveError::InvalidRequest(format!(
                "target size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// The image to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDescriptor {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// How a descriptor was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The source already fit the box.
    Original,
    /// A previously generated variant was found on disk.
    Cached,
    /// A new variant was encoded.
    Generated,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Original => f.write_str("original"),
            Self::Cached => f.write_str("cached"),
            Self::Generated => f.write_str("generated"),
        }
    }
}

/// A descriptor together with how it was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolved {
    #[serde(flatten)]
    pub descriptor: VariantDescriptor,
    pub outcome: Outcome,
}

/// A loosely specified request, as it arrives from the CLI or a batch file.
///
/// Exactly one of `id`/`url` must be set, and either `size` (a named
/// preset) or both `width` and `height`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariantQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default)]
    pub crop: bool,
}

impl fmt::Display for VariantQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.id, &self.url) {
            (Some(id), _) => write!(f, "item {}", id)?,
            (None, Some(url)) => f.write_str(url)?,
            (None, None) => f.write_str("?")?,
        }
        match (&self.size, self.width, self.height) {
            (Some(size), _, _) => write!(f, " [{}]", size),
            (None, Some(w), Some(h)) => {
                write!(f, " [{}x{}{}]", w, h, if self.crop { " crop" } else { "" })
            }
            _ => Ok(()),
        }
    }
}

/// Reshapes descriptors before they are returned.
pub trait VariantFilter: Send + Sync {
    fn filter(
        &self,
        source: &SourceImage,
        request: &VariantRequest,
        descriptor: VariantDescriptor,
    ) -> VariantDescriptor;
}

impl<F> VariantFilter for F
where
    F: Fn(&SourceImage, &VariantRequest, VariantDescriptor) -> VariantDescriptor + Send + Sync,
{
    fn filter(
        &self,
        source: &SourceImage,
        request: &VariantRequest,
        descriptor: VariantDescriptor,
    ) -> VariantDescriptor {
        self(source, request, descriptor)
    }
}

/// Swap a URL prefix, e.g. the site origin for a CDN origin.
#[derive(Debug, Clone)]
pub struct UrlRewrite {
    from: String,
    to: String,
}

impl UrlRewrite {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into().trim_end_matches('/').to_string(),
            to: to.into().trim_end_matches('/').to_string(),
        }
    }
}

impl VariantFilter for UrlRewrite {
    fn filter(
        &self,
        _source: &SourceImage,
        _request: &VariantRequest,
        mut descriptor: VariantDescriptor,
    ) -> VariantDescriptor {
        if let Some(rest) = descriptor.url.strip_prefix(&self.from)
            && (rest.is_empty() || rest.starts_with(['/', '?', '#']))
        {
            descriptor.url = format!("{}{}", self.to, rest);
        }
        descriptor
    }
}

/// Result of [`VariantResolver::resolve_batch`], in input order.
#[derive(Debug)]
pub struct BatchReport {
    pub results: Vec<Result<Resolved, ResolveError>>,
    pub stats: CacheStats,
}

/// Resolves, generates and caches image variants.
pub struct VariantResolver<B, R> {
    backend: B,
    repository: R,
    document_root: PathBuf,
    quality: Quality,
    sizes: BTreeMap<String, SizePreset>,
    filters: Vec<Box<dyn VariantFilter>>,
    locks: PathLocks,
}

impl<B: ImageBackend, R: ContentRepository> VariantResolver<B, R> {
    pub fn new(backend: B, repository: R, document_root: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            repository,
            document_root: document_root.into(),
            quality: Quality::default(),
            sizes: BTreeMap::new(),
            filters: Vec::new(),
            locks: PathLocks::new(),
        }
    }

    /// Build a resolver from a loaded config: document root, quality, named
    /// sizes, and the CDN rewrite when `cdn_url` is set.
    pub fn from_config(backend: B, repository: R, config: &ResolverConfig) -> Self {
        let mut resolver = Self::new(backend, repository, &config.document_root)
            .with_quality(Quality::new(config.quality))
            .with_sizes(config.sizes.clone());
        if let Some(cdn) = &config.cdn_url {
            resolver = resolver.with_filter(UrlRewrite::new(&config.site_url, cdn));
        }
        resolver
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_sizes(mut self, sizes: BTreeMap<String, SizePreset>) -> Self {
        self.sizes = sizes;
        self
    }

    /// Register a filter; filters run in registration order.
    pub fn with_filter(mut self, filter: impl VariantFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Resolve the variant of `reference` for `request`.
    pub fn resolve_variant(
        &self,
        reference: &ImageReference,
        request: &VariantRequest,
    ) -> Result<VariantDescriptor, ResolveError> {
        self.resolve(reference, request).map(|r| r.descriptor)
    }

    /// Like [`resolve_variant`](Self::resolve_variant), also reporting the
    /// [`Outcome`].
    pub fn resolve(
        &self,
        reference: &ImageReference,
        request: &VariantRequest,
    ) -> Result<Resolved, ResolveError> {
        request.validate()?;
        let source = self.source(reference)?;
        let (descriptor, outcome) = self.resolve_for_source(&source, request)?;
        Ok(Resolved {
            descriptor: self.apply_filters(&source, request, descriptor),
            outcome,
        })
    }

    /// Resolve a named size preset. `full` always returns the original.
    pub fn resolve_named(
        &self,
        reference: &ImageReference,
        size: &str,
    ) -> Result<Resolved, ResolveError> {
        if size == FULL_SIZE {
            let source = self.source(reference)?;
            let request = VariantRequest::fit(source.original.width, source.original.height);
            let descriptor = self.original_descriptor(&source);
            return Ok(Resolved {
                descriptor: self.apply_filters(&source, &request, descriptor),
                outcome: Outcome::Original,
            });
        }
        let preset = self
            .sizes
            .get(size)
            .ok_or_else(|| ResolveError::UnknownSize(size.to_string()))?;
        self.resolve(reference, &preset.request())
    }

    /// Resolve a loosely specified query (CLI flags, batch file rows).
    pub fn resolve_query(&self, query: &VariantQuery) -> Result<Resolved, ResolveError> {
        let reference = ImageReference::from_parts(query.id, query.url.clone())?;
        match (&query.size, query.width, query.height) {
            (Some(size), None, None) => self.resolve_named(&reference, size),
            (None, Some(width), Some(height)) => {
                self.resolve(&reference, &VariantRequest::new(width, height, query.crop))
            }
            (Some(_), _, _) => Err(ResolveError::InvalidRequest(
                "give either a named size or width/height, not both".into(),
            )),
            _ => Err(ResolveError::InvalidRequest(
                "need a named size or both width and height".into(),
            )),
        }
    }

    /// Resolve many queries in parallel. Results keep input order.
    pub fn resolve_batch(&self, queries: &[VariantQuery]) -> BatchReport {
        let results: Vec<Result<Resolved, ResolveError>> =
            queries.par_iter().map(|q| self.resolve_query(q)).collect();
        let mut stats = CacheStats::default();
        for result in &results {
            match result {
                Ok(resolved) => stats.record(resolved.outcome),
                Err(_) => stats.fail(),
            }
        }
        BatchReport { results, stats }
    }

    /// Resolve a reference to its source image only.
    pub fn source(&self, reference: &ImageReference) -> Result<SourceImage, ResolveError> {
        resolve_source(
            reference,
            &self.repository,
            &self.document_root,
            &self.backend,
        )
    }

    fn resolve_for_source(
        &self,
        source: &SourceImage,
        request: &VariantRequest,
    ) -> Result<(VariantDescriptor, Outcome), ResolveError> {
        let bounds = (request.width, request.height);
        if !needs_resize(source.original.as_tuple(), bounds) {
            debug!(path = %source.path.display(), "source fits, no resize");
            return Ok((self.original_descriptor(source), Outcome::Original));
        }

        if let Some(hit) = self.lookup(source, request) {
            return Ok((hit, Outcome::Cached));
        }

        let key = self.generation_key(source, request);
        self.locks.with_lock(&key, || {
            // Another caller may have generated it while we waited.
            if let Some(hit) = self.lookup(source, request) {
                return Ok((hit, Outcome::Cached));
            }
            self.generate(source, request)
                .map(|descriptor| (descriptor, Outcome::Generated))
        })
    }

    /// The file generation will write: the box for crops, the fitted size
    /// for fits. Boxes that fit to the same size share one key.
    fn generation_key(&self, source: &SourceImage, request: &VariantRequest) -> PathBuf {
        match request.mode() {
            ResizeMode::Crop => derived_path(&source.path, request.dims(), ResizeMode::Crop),
            ResizeMode::Fit => derived_path(&source.path, fitted(source, request), ResizeMode::Fit),
        }
    }

    /// Cache lookup: exact-box name first, then the fitted size (fit only).
    fn lookup(&self, source: &SourceImage, request: &VariantRequest) -> Option<VariantDescriptor> {
        let exact = derived_path(&source.path, request.dims(), request.mode());
        if exact.is_file() {
            debug!(path = %exact.display(), "variant cache hit");
            return Some(self.variant_descriptor(source, &exact, request.dims()));
        }
        if request.mode() == ResizeMode::Fit {
            let fitted = fitted(source, request);
            let proportional = derived_path(&source.path, fitted, ResizeMode::Fit);
            if proportional.is_file() {
                debug!(path = %proportional.display(), "variant cache hit");
                return Some(self.variant_descriptor(source, &proportional, fitted));
            }
        }
        None
    }

    fn generate(
        &self,
        source: &SourceImage,
        request: &VariantRequest,
    ) -> Result<VariantDescriptor, ResolveError> {
        let mode = request.mode();
        let mut editor = self
            .backend
            .open(&source.path)
            .map_err(codec(CodecStage::EditOpen))?;
        editor.set_quality(self.quality);
        let produced = editor
            .resize(request.width, request.height, mode)
            .map_err(codec(CodecStage::Resize))?;

        // Fit output is named after what the codec actually produced.
        let name_dims = match mode {
            ResizeMode::Crop => request.dims(),
            ResizeMode::Fit => produced,
        };
        let dest = derived_path(&source.path, name_dims, mode);
        write_atomically(&dest, |tmp| editor.save(tmp)).map_err(codec(CodecStage::Save))?;

        let actual = self
            .backend
            .identify(&dest)
            .map_err(|e| ResolveError::DimensionProbeFailure {
                path: dest.clone(),
                source: e,
            })?;
        info!(
            path = %dest.display(),
            width = actual.width,
            height = actual.height,
            %mode,
            "generated variant"
        );
        Ok(self.variant_descriptor(source, &dest, actual))
    }

    fn original_descriptor(&self, source: &SourceImage) -> VariantDescriptor {
        VariantDescriptor {
            url: source.url.clone(),
            width: source.original.width,
            height: source.original.height,
        }
    }

    fn variant_descriptor(
        &self,
        source: &SourceImage,
        path: &Path,
        dims: Dimensions,
    ) -> VariantDescriptor {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        VariantDescriptor {
            url: substitute_basename(&source.url, &file_name),
            width: dims.width,
            height: dims.height,
        }
    }

    fn apply_filters(
        &self,
        source: &SourceImage,
        request: &VariantRequest,
        descriptor: VariantDescriptor,
    ) -> VariantDescriptor {
        self.filters
            .iter()
            .fold(descriptor, |d, filter| filter.filter(source, request, d))
    }
}
