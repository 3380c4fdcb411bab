//! CLI output formatting.
//!
//! Each command has a `format_*` function returning `Vec<String>` so output
//! can be tested without capturing stdout; [`print_lines`] writes them out.
//! Format functions are pure and do no I/O.
//!
//! # Output Format
//!
//! ## Resolve
//!
//! ```text
//! http://example.com/uploads/sunset-140x70.jpg
//!     140x70 (generated)
//! ```
//!
//! With `--format json` the descriptor is printed as JSON, with
//! `--format html` as an `<img>` tag.
//!
//! ## Variants
//!
//! ```text
//! uploads/sunset.jpg (2000x1000)
//!     sunset-140x110-crop.jpg  140x110 crop
//!     sunset-140x70.jpg        140x70 fit
//! ```
//!
//! ## Batch
//!
//! ```text
//! 001 item 1 [thumbnail] → http://example.com/uploads/sunset-150x150-crop.jpg 150x150 (cached)
//! 002 item 9 [140x110] ✗ Source item not found: 9
//! Cache: 1 cached, 0 generated, 0 original, 1 failed (2 total)
//! ```

use crate::cache::CacheStats;
use crate::config::{FULL_SIZE, SizePreset};
use crate::naming::parse_derived_name;
use crate::resolve::{BatchReport, Resolved, VariantDescriptor, VariantQuery};
use crate::source::{LibraryEntry, SourceImage};
use maud::html;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Show `path` relative to `root` when it lies inside it.
fn display_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

/// Write formatted lines to stdout.
pub fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}

// ============================================================================
// Resolve
// ============================================================================

/// URL on the first line, size and outcome indented below.
pub fn format_resolved(resolved: &Resolved) -> Vec<String> {
    let d = &resolved.descriptor;
    vec![
        d.url.clone(),
        format!("    {}x{} ({})", d.width, d.height, resolved.outcome),
    ]
}

/// Pretty JSON for a descriptor: `{"url": ..., "width": ..., "height": ...}`.
pub fn descriptor_json(descriptor: &VariantDescriptor) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(descriptor)
}

/// An `<img>` element for a descriptor. Attribute values are escaped.
pub fn img_tag(descriptor: &VariantDescriptor, alt: &str) -> String {
    html! {
        img src=(descriptor.url) width=(descriptor.width) height=(descriptor.height) alt=(alt);
    }
    .into_string()
}

// ============================================================================
// Variants / purge
// ============================================================================

/// List a source and the variants found next to it.
pub fn format_variants(source: &SourceImage, variants: &[PathBuf], root: &Path) -> Vec<String> {
    let mut lines = vec![format!(
        "{} ({}x{})",
        display_path(&source.path, root),
        source.original.width,
        source.original.height
    )];
    if variants.is_empty() {
        lines.push("    no variants".to_string());
        return lines;
    }

    let names: Vec<String> = variants.iter().map(|p| file_name(p)).collect();
    let width = names.iter().map(|n| n.chars().count()).max().unwrap_or(0);
    for name in &names {
        match parse_derived_name(name) {
            Some(parsed) => lines.push(format!(
                "    {:<width$}  {}x{} {}",
                name,
                parsed.dims.width,
                parsed.dims.height,
                parsed.mode,
                width = width
            )),
            None => lines.push(format!("    {}", name)),
        }
    }
    lines
}

pub fn format_purged(removed: &[PathBuf], root: &Path) -> Vec<String> {
    let mut lines: Vec<String> = removed
        .iter()
        .map(|p| format!("    removed {}", display_path(p, root)))
        .collect();
    lines.push(format!(
        "Purged {} file{}",
        removed.len(),
        if removed.len() == 1 { "" } else { "s" }
    ));
    lines
}

// ============================================================================
// Batch
// ============================================================================

/// One line per query in input order, then the cache summary.
pub fn format_batch(queries: &[VariantQuery], report: &BatchReport) -> Vec<String> {
    let mut lines: Vec<String> = queries
        .iter()
        .zip(&report.results)
        .enumerate()
        .map(|(i, (query, result))| match result {
            Ok(resolved) => format!(
                "{} {} → {} {}x{} ({})",
                format_index(i + 1),
                query,
                resolved.descriptor.url,
                resolved.descriptor.width,
                resolved.descriptor.height,
                resolved.outcome
            ),
            Err(e) => format!("{} {} ✗ {}", format_index(i + 1), query, e),
        })
        .collect();
    lines.push(format_cache_stats(&report.stats));
    lines
}

pub fn format_cache_stats(stats: &CacheStats) -> String {
    format!("Cache: {}", stats)
}

// ============================================================================
// Sizes / index
// ============================================================================

/// Table of named sizes. `full` is always listed last.
pub fn format_sizes(sizes: &BTreeMap<String, SizePreset>) -> Vec<String> {
    let width = sizes
        .keys()
        .map(|k| k.chars().count())
        .chain(std::iter::once(FULL_SIZE.len()))
        .max()
        .unwrap_or(0);
    let mut lines: Vec<String> = sizes
        .iter()
        .map(|(name, preset)| {
            format!(
                "{:<width$}  {}x{} {}",
                name,
                preset.width,
                preset.height,
                if preset.crop { "crop" } else { "fit" },
                width = width
            )
        })
        .collect();
    lines.push(format!("{:<width$}  original", FULL_SIZE, width = width));
    lines
}

pub fn format_index_output(entries: &[LibraryEntry], library: &Path) -> Vec<String> {
    let mut lines: Vec<String> = entries
        .iter()
        .map(|e| {
            format!(
                "{} {} ({}x{})",
                format_index(e.id.0 as usize),
                e.item.path.display(),
                e.item.width,
                e.item.height
            )
        })
        .collect();
    lines.push(format!(
        "Indexed {} image{} → {}",
        entries.len(),
        if entries.len() == 1 { "" } else { "s" },
        library.display()
    ));
    lines
}
