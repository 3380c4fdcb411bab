//! # Image Variants
//!
//! Resolve an image reference plus a target box to the file that should be
//! displayed: `{url, width, height}`. Derived files are generated on first
//! request and cached on disk next to their source, so every later request
//! for the same variant is a filesystem lookup.
//!
//! ```text
//! (item 42 | url)  +  140x110  +  crop?
//!        │
//!        ▼
//! source image  ──fits already──▶  original url + size
//!        │
//!        ├──variant on disk──────▶  variant url + size      (cached)
//!        │
//!        └──open → resize → save ▶  variant url + size      (generated)
//! ```
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`source`] | Reference → source file, URL and original size; item library |
//! | [`resolve`] | The resolver: short-circuit, cache lookup, generation, filters |
//! | [`naming`] | Derived file names (`sunset-140x70.jpg`, `sunset-140x110-crop.jpg`) and URL basename substitution |
//! | [`cache`] | Per-variant locks, atomic writes, cache stats, listing and purging variants |
//! | [`imaging`] | Codec traits, dimension math, and the pure-Rust `image` backend |
//! | [`config`] | `config.toml` loading, validation and merging over stock defaults |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Derived Files Live Next to the Source
//!
//! A variant's name is the source stem, the box, and a `-crop` tag for cropped
//! variants: `sunset-140x110-crop.jpg`. There is no index of generated files;
//! the directory listing is the cache. Its URL is the source URL with the last
//! path segment swapped, so query strings and CDN origins carry over.
//!
//! ## Fit Variants Are Named by Their Actual Size
//!
//! A fit request for `140x110` on a 2:1 source produces `sunset-140x70.jpg`.
//! Later requests compute the fitted size and find that file directly, without
//! opening the codec.
//!
//! ## Generate Once
//!
//! Concurrent requests for the same variant serialize on a per-path lock and
//! re-check the disk after acquiring it. Encoders write to a hidden temp file
//! that is renamed into place, so a reader never sees a half-written variant.

pub mod cache;
pub mod config;
pub mod imaging;
pub mod naming;
pub mod output;
pub mod resolve;
pub mod source;

pub use resolve::{
    Outcome, ResolveError, Resolved, VariantDescriptor, VariantFilter, VariantQuery,
    VariantRequest, VariantResolver,
};
pub use source::{ImageReference, ItemId};

#[cfg(test)]
pub(crate) mod test_helpers;
