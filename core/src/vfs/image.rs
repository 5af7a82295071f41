//! In-place image editing

use crate::error::{display_name, ConnectorError, ConnectorResult};
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageFormat};
use std::fs;
use std::path::Path;
use tempfile::NamedTempFile;

/// Upper bound on the pixel count a resize may produce
pub const MAX_OUTPUT_PIXELS: u64 = 40_000_000;

/// Edit applied by the `resize` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEdit {
    Resize { width: u32, height: u32 },
    Crop { x: u32, y: u32, width: u32, height: u32 },
    Rotate { degrees: u32 },
}

impl ImageEdit {
    /// Build a rotation, accepting any multiple of 90 including negatives
    pub fn rotate(degrees: i64) -> ConnectorResult<Self> {
        let normalized = degrees.rem_euclid(360);
        if normalized % 90 != 0 {
            return Err(ConnectorError::MissingParameter("degree".to_string()));
        }
        Ok(ImageEdit::Rotate {
            degrees: normalized as u32,
        })
    }
}

/// Width and height of an image, read from its header only
pub fn dimensions(path: &Path) -> ConnectorResult<(u32, u32)> {
    image::image_dimensions(path).map_err(|e| map_image_error(e, path))
}

/// Apply `edit` and write the result back in the original format
pub fn apply(path: &Path, edit: ImageEdit) -> ConnectorResult<(u32, u32)> {
    if let ImageEdit::Resize { width, height } = edit {
        if u64::from(width) * u64::from(height) > MAX_OUTPUT_PIXELS {
            return Err(ConnectorError::MissingParameter(format!(
                "width x height exceeds {} pixels",
                MAX_OUTPUT_PIXELS
            )));
        }
    }

    let format = ImageFormat::from_path(path).map_err(|e| map_image_error(e, path))?;
    let img = image::open(path).map_err(|e| map_image_error(e, path))?;

    let edited = match edit {
        ImageEdit::Resize { width, height } => {
            if width == 0 || height == 0 {
                return Err(ConnectorError::MissingParameter("width".to_string()));
            }
            img.resize_exact(width, height, FilterType::Lanczos3)
        }
        ImageEdit::Crop {
            x,
            y,
            width,
            height,
        } => {
            if width == 0 || height == 0 || x >= img.width() || y >= img.height() {
                return Err(ConnectorError::MissingParameter("width".to_string()));
            }
            img.crop_imm(x, y, width, height)
        }
        ImageEdit::Rotate { degrees } => rotate(img, degrees),
    };

    let dims = (edited.width(), edited.height());
    save_in_place(&edited, path, format)?;
    Ok(dims)
}

fn rotate(img: DynamicImage, degrees: u32) -> DynamicImage {
    match degrees {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img,
    }
}

/// Encode next to the original and swap it in, so a failed encode leaves the file untouched
fn save_in_place(img: &DynamicImage, path: &Path, format: ImageFormat) -> ConnectorResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| ConnectorError::InvalidTarget(display_name(path)))?;
    let tmp = NamedTempFile::new_in(dir).map_err(|e| ConnectorError::io(e, path))?;

    img.save_with_format(tmp.path(), format)
        .map_err(|e| map_image_error(e, path))?;
    let original = fs::metadata(path).map_err(|e| ConnectorError::io(e, path))?;
    fs::set_permissions(tmp.path(), original.permissions())
        .map_err(|e| ConnectorError::io(e, path))?;
    tmp.persist(path)
        .map_err(|e| ConnectorError::io(e.error, path))?;
    Ok(())
}

fn map_image_error(err: ImageError, path: &Path) -> ConnectorError {
    match err {
        ImageError::IoError(e) => ConnectorError::io(e, path),
        _ => ConnectorError::UnsupportedImage(display_name(path)),
    }
}
