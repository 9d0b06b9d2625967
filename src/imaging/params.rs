//! Parameter types for transcoding.
//!
//! These structs describe *what* to produce, not *how* to produce it. They are
//! the interface between the [`pipeline`](crate::pipeline) (which decides what
//! outputs a file needs) and the [`backend`](super::backend) (which does the
//! pixel work). This separation allows swapping backends (e.g. for testing with
//! a mock) without changing pipeline logic.
//!
//! ## Types
//!
//! - [`OutputFormat`]: Target encoding (`webp`, `avif`, `jpeg`, `png`).
//! - [`Quality`]: Lossy encoding quality (1–100, default 80). Clamped on construction.
//! - [`ResizeSpec`]: Keep original dimensions, or downscale to a maximum width.
//! - [`OutputSpec`]: Full specification for one output file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Output encodings the pipeline can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Webp,
    Avif,
    Jpeg,
    Png,
}

impl OutputFormat {
    /// File extension used for outputs of this format.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(80)
    }
}

/// How an output's dimensions relate to the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeSpec {
    /// Encode at the source dimensions.
    Original,
    /// Downscale so the width is at most this many pixels. Never upscales.
    MaxWidth(u32),
}

/// One output file to produce from a source image.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    pub path: PathBuf,
    pub format: OutputFormat,
    pub quality: Quality,
    pub resize: ResizeSpec,
}
