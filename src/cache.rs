//! On-disk variant cache.
//!
//! There is no manifest: a variant's [derived filename](crate::naming) is its
//! cache key, so a lookup is a plain existence check. This module holds the
//! pieces that make that safe and manageable.
//!
//! ## Generation races
//!
//! Check-then-generate is a classic race: two requests for the same uncached
//! variant can both miss and both encode. Two guards close it:
//!
//! - [`PathLocks`] serialises generation per derived key inside a process.
//!   The resolver re-checks the cache once it holds the lock, so the second
//!   caller finds the first caller's file instead of encoding again.
//! - [`write_atomically`] writes to a hidden temp sibling and renames it over
//!   the final path. Separate processes may still both encode, but readers
//!   only ever see a complete file.
//!
//! ## Housekeeping
//!
//! [`list_variants`] and [`purge_variants`] work on one source;
//! [`purge_tree`] sweeps a whole directory tree (including temp files left
//! behind by a crash).
//!
//! A file counts as a variant only when its source sits next to it and, for
//! fit names, its size keeps the source's aspect ratio. An upload such as
//! `banner-728x90.jpg` beside a 1000x500 `banner.jpg` is left alone.

use crate::imaging::{BackendError, Dimensions, ImageBackend};
use crate::naming::{final_path_of_temp, is_variant_of, parse_derived_name, temp_path};
use crate::resolve::Outcome;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Per-key mutual exclusion for variant generation.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// Entries are dropped again once no caller holds or waits on them.
    pub fn with_lock<T>(&self, key: &Path, f: impl FnOnce() -> T) -> T {
        let lock = self.locks.lock().entry(key.to_path_buf()).or_default().clone();
        let result = {
            let _guard = lock.lock();
            f()
        };
        let mut locks = self.locks.lock();
        // One reference in the map, one here: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
        result
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write `final_path` through a temp sibling and rename it into place.
///
/// The temp file is removed if writing or renaming fails.
pub fn write_atomically<F>(final_path: &Path, write: F) -> Result<(), BackendError>
where
    F: FnOnce(&Path) -> Result<(), BackendError>,
{
    let tmp = temp_path(final_path);
    let result = write(&tmp).and_then(|()| std::fs::rename(&tmp, final_path).map_err(Into::into));
    if result.is_err()
        && tmp.exists()
        && let Err(e) = std::fs::remove_file(&tmp)
    {
        warn!(path = %tmp.display(), error = %e, "failed to remove temp file");
    }
    result
}

/// Summary of how a batch of requests was served.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Source already fit; served as-is.
    pub original: u32,
    pub cached: u32,
    pub generated: u32,
    pub failed: u32,
}

impl CacheStats {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Original => self.original += 1,
            Outcome::Cached => self.cached += 1,
            Outcome::Generated => self.generated += 1,
        }
    }

    pub fn fail(&mut self) {
        self.failed += 1;
    }

    pub fn total(&self) -> u32 {
        self.original + self.cached + self.generated + self.failed
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cached, {} generated, {} original",
            self.cached, self.generated, self.original
        )?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        write!(f, " ({} total)", self.total())
    }
}

/// Derived variants sitting next to `source` (full size `original`),
/// sorted by path.
pub fn list_variants(source: &Path, original: Dimensions) -> io::Result<Vec<PathBuf>> {
    let Some(dir) = source.parent() else {
        return Ok(Vec::new());
    };
    let mut variants = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if entry.file_type()?.is_file() && is_variant_of(source, original, &name.to_string_lossy())
        {
            variants.push(entry.path());
        }
    }
    variants.sort();
    Ok(variants)
}

/// Delete every derived variant of `source`. Returns the removed paths.
pub fn purge_variants(source: &Path, original: Dimensions) -> io::Result<Vec<PathBuf>> {
    let variants = list_variants(source, original)?;
    for path in &variants {
        std::fs::remove_file(path)?;
        debug!(path = %path.display(), "removed variant");
    }
    Ok(variants)
}

/// Sweep `root`: remove derived variants whose source still sits next to
/// them, and leftover temp files. Hidden directories are not entered.
pub fn purge_tree(root: &Path, backend: &impl ImageBackend) -> io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !(e.file_type().is_dir() && is_hidden(e)));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if final_path_of_temp(path).is_some() || source_of_variant(path, backend).is_some() {
            std::fs::remove_file(path)?;
            debug!(path = %path.display(), "removed variant");
            removed.push(path.to_path_buf());
        }
    }
    Ok(removed)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|s| s.starts_with('.'))
}

/// If `path` is a derived variant, the source file it was made from.
///
/// The source's extension may differ in case from the variant's. Fit names
/// are checked against the source's header; a source whose header cannot be
/// read keeps its look-alikes.
pub fn source_of_variant(path: &Path, backend: &impl ImageBackend) -> Option<PathBuf> {
    let parsed = parse_derived_name(path.file_name()?.to_str()?)?;
    let dir = path.parent()?;
    let source = std::fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .find(|candidate| {
            candidate != path && candidate.is_file() && parsed.names_source(candidate)
        })?;
    if parsed.mode.is_crop() {
        return Some(source);
    }
    match backend.identify(&source) {
        Ok(original) => parsed.matches_source(original).then_some(source),
        Err(e) => {
            debug!(path = %source.display(), error = %e, "source header unreadable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockBackend;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    // =========================================================================
    // PathLocks
    // =========================================================================

    #[test]
    fn lock_entries_are_released() {
        let locks = PathLocks::new();
        let value = locks.with_lock(Path::new("/a"), || 42);
        assert_eq!(value, 42);
        assert!(locks.is_empty());
    }

    #[test]
    fn same_key_is_serialised() {
        let locks = Arc::new(PathLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                std::thread::spawn(move || {
                    locks.with_lock(Path::new("/same"), || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(2));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    // =========================================================================
    // write_atomically
    // =========================================================================

    #[test]
    fn atomic_write_lands_at_final_path() {
        let tmp = TempDir::new().unwrap();
        let final_path = tmp.path().join("a-1x1.png");

        write_atomically(&final_path, |p| {
            fs::write(p, b"pixels")?;
            Ok(())
        })
        .unwrap();

        assert_eq!(fs::read(&final_path).unwrap(), b"pixels");
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_write_leaves_nothing_behind() {
        let tmp = TempDir::new().unwrap();
        let final_path = tmp.path().join("a-1x1.png");

        let result = write_atomically(&final_path, |p| {
            fs::write(p, b"half")?;
            Err(BackendError::ProcessingFailed("encoder died".into()))
        });

        assert!(result.is_err());
        assert!(!final_path.exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    // =========================================================================
    // CacheStats
    // =========================================================================

    #[test]
    fn cache_stats_display() {
        let mut s = CacheStats::default();
        s.record(Outcome::Cached);
        s.record(Outcome::Cached);
        s.record(Outcome::Generated);
        s.record(Outcome::Original);
        assert_eq!(
            format!("{}", s),
            "2 cached, 1 generated, 1 original (4 total)"
        );
    }

    #[test]
    fn cache_stats_display_with_failures() {
        let mut s = CacheStats::default();
        s.record(Outcome::Generated);
        s.fail();
        assert_eq!(
            format!("{}", s),
            "0 cached, 1 generated, 0 original, 1 failed (2 total)"
        );
    }

    // =========================================================================
    // Listing and purging
    // =========================================================================

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn list_variants_finds_only_derived_siblings() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("sunset.JPG");
        touch(&src);
        touch(&tmp.path().join("sunset-140x70.jpg"));
        touch(&tmp.path().join("sunset-140x110-crop.jpg"));
        touch(&tmp.path().join("sunset-140x70.png"));
        touch(&tmp.path().join("sunrise-140x70.jpg"));
        // Wrong aspect for a 2000x1000 source: an upload, not a fit.
        touch(&tmp.path().join("sunset-728x90.jpg"));

        let names: Vec<String> = list_variants(&src, Dimensions::new(2000, 1000))
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["sunset-140x110-crop.jpg", "sunset-140x70.jpg"]);
    }

    #[test]
    fn purge_variants_keeps_source() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("a.png");
        touch(&src);
        touch(&tmp.path().join("a-10x10.png"));
        touch(&tmp.path().join("a-20x5-crop.png"));

        let removed = purge_variants(&src, Dimensions::new(40, 40)).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(src.exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn source_of_variant_requires_sibling() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        touch(&dir.join("photo.JPG"));
        touch(&dir.join("photo-10x10.jpg"));
        touch(&dir.join("banner-728x90.jpg"));
        let backend = MockBackend::new().with_file(dir.join("photo.JPG"), 20, 20);

        assert_eq!(
            source_of_variant(&dir.join("photo-10x10.jpg"), &backend),
            Some(dir.join("photo.JPG"))
        );
        assert_eq!(source_of_variant(&dir.join("banner-728x90.jpg"), &backend), None);
        assert_eq!(source_of_variant(&dir.join("photo.JPG"), &backend), None);
    }

    #[test]
    fn source_of_variant_checks_fit_aspect() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        for name in [
            "banner.jpg",
            "banner-728x90.jpg",
            "banner-180x90.jpg",
            "banner-728x90-crop.jpg",
            "logo.png",
            "logo-10x10.png",
        ] {
            touch(&dir.join(name));
        }
        // logo.png is not registered, so its header is unreadable.
        let backend = MockBackend::new().with_file(dir.join("banner.jpg"), 1000, 500);

        assert_eq!(source_of_variant(&dir.join("banner-728x90.jpg"), &backend), None);
        assert_eq!(
            source_of_variant(&dir.join("banner-180x90.jpg"), &backend),
            Some(dir.join("banner.jpg"))
        );
        assert_eq!(
            source_of_variant(&dir.join("banner-728x90-crop.jpg"), &backend),
            Some(dir.join("banner.jpg"))
        );
        assert_eq!(source_of_variant(&dir.join("logo-10x10.png"), &backend), None);
    }

    #[test]
    fn purge_tree_sweeps_variants_and_temp_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("up/2014/a.jpg"));
        touch(&root.join("up/2014/a-10x5.jpg"));
        touch(&root.join("up/b.png"));
        touch(&root.join("up/b-4x4-crop.png"));
        touch(&temp_path(&root.join("up/b-8x8.png")));
        touch(&root.join("up/banner.jpg"));
        touch(&root.join("up/banner-728x90.jpg"));
        touch(&root.join(".cache/a.jpg"));
        touch(&root.join(".cache/a-1x1.jpg"));
        let backend = MockBackend::new()
            .with_file(root.join("up/2014/a.jpg"), 20, 10)
            .with_file(root.join("up/banner.jpg"), 1000, 500);

        let removed = purge_tree(root, &backend).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(!root.join("up/2014/a-10x5.jpg").exists());
        assert!(!root.join("up/b-4x4-crop.png").exists());
        assert!(root.join("up/2014/a.jpg").exists());
        assert!(root.join("up/b.png").exists());
        assert!(root.join("up/banner-728x90.jpg").exists());
        assert!(root.join(".cache/a-1x1.jpg").exists());
    }
}
