//! Image codec layer — pure Rust, no system libraries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::image_dimensions` |
//! | **Fit resize** | `fit_dimensions`, then `resize_exact` with Lanczos3 |
//! | **Crop resize** | `resize_to_fill` with Lanczos3 |
//! | **Encode** | `image` encoders chosen by extension |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Quality and resize mode
//! - **Backend**: [`ImageBackend`] / [`ImageEditor`] traits + [`RustBackend`]

pub mod backend;
mod calculations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend, ImageEditor};
pub use calculations::{fit_dimensions, needs_resize};
pub use params::{Quality, ResizeMode};
pub use rust_backend::{RustBackend, is_supported_image, supported_input_extensions};
