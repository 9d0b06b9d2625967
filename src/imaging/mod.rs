//! Image transcoding in pure Rust with no system dependencies.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::image_dimensions` |
//! | **Transcode** | decode once, Lanczos3 downscale, encode per output |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing outputs
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]

pub mod backend;
mod calculations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend, OutputResult};
pub use calculations::{fit_to_width, target_dimensions};
pub use params::{OutputFormat, OutputSpec, Quality, ResizeSpec};
pub use rust_backend::{RustBackend, supported_input_extensions};
