//! Pure Rust transcoding backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | Resize | `image::DynamicImage::resize` with `Lanczos3` filter |
//! | Encode → WebP | `webp::Encoder` (lossy, libwebp) |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//! | Encode → PNG | `image::codecs::png::PngEncoder` |

use super::backend::{BackendError, Dimensions, ImageBackend, OutputResult};
use super::calculations::target_dimensions;
use super::params::{OutputFormat, OutputSpec};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::LazyLock;

/// Extensions whose decoders are compiled in.
///
/// AVIF is excluded: the `image` crate's `"avif"` feature only enables the
/// **encoder**.
const PHOTO_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    PHOTO_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Pure Rust backend using the `image` crate ecosystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Load and decode an image from disk.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| match e {
            image::ImageError::Unsupported(u) => BackendError::UnsupportedFormat(u.to_string()),
            image::ImageError::IoError(io) => BackendError::Io(io),
            other => BackendError::Decode {
                path: path.to_path_buf(),
                message: other.to_string(),
            },
        })
}

/// Encode `img` to `path` in the requested format.
fn save_image(img: &DynamicImage, path: &Path, spec: &OutputSpec) -> Result<(), BackendError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    let quality = spec.quality.value() as u8;
    let encoded = match spec.format {
        OutputFormat::Avif => img.write_with_encoder(
            image::codecs::avif::AvifEncoder::new_with_speed_quality(writer, 6, quality),
        ),
        OutputFormat::Webp => {
            let rgba = img.to_rgba8();
            let encoded = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
                .encode(f32::from(quality));
            writer
                .write_all(&encoded)
                .and_then(|()| writer.flush())
                .map_err(image::ImageError::IoError)
        }
        OutputFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(
            image::codecs::jpeg::JpegEncoder::new_with_quality(writer, quality),
        ),
        OutputFormat::Png => {
            img.write_with_encoder(image::codecs::png::PngEncoder::new(writer))
        }
    };
    encoded.map_err(|e| BackendError::Encode(format!("{} encode failed: {}", spec.format, e)))
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
        let (width, height) = image::image_dimensions(path).map_err(|e| match e {
            image::ImageError::IoError(io) => BackendError::Io(io),
            other => BackendError::Decode {
                path: path.to_path_buf(),
                message: other.to_string(),
            },
        })?;
        Ok(Dimensions { width, height })
    }

    fn transcode(
        &self,
        source: &Path,
        outputs: &[OutputSpec],
    ) -> Result<Vec<OutputResult>, BackendError> {
        let img = load_image(source)?;
        let source_dims = (img.width(), img.height());

        let results = outputs
            .iter()
            .map(|spec| {
                let (w, h) = target_dimensions(source_dims, spec.resize);
                let written = if (w, h) == source_dims {
                    save_image(&img, &spec.path, spec)
                } else {
                    save_image(&img.resize(w, h, FilterType::Lanczos3), &spec.path, spec)
                };
                match written {
                    Ok(()) => OutputResult::ok(&spec.path),
                    Err(e) => {
                        // Don't leave a truncated file that looks newer than its source.
                        let _ = std::fs::remove_file(&spec.path);
                        OutputResult::failed(&spec.path, e.to_string())
                    }
                }
            })
            .collect();
        Ok(results)
    }
}
