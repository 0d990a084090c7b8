//! Page-image assets: the rasteriser boundary of the extraction engine.
//!
//! Rasterisation itself happens outside this crate (an imaging tool renders
//! each scanned PDF page to a PNG/JPEG already conditioned to ≤1800 px on the
//! long edge). This module owns the type that crosses the boundary —
//! [`PageImage`] — plus loaders that probe the decoded dimensions so the
//! pipeline never trusts a file extension.
//!
//! A `PageImage` is immutable once constructed; the pipeline only ever
//! borrows it for the duration of one run.

use crate::error::DeedscanError;
use image::ImageReader;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One rasterised page of a scanned document, in page order.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 0-based position in the document's page order.
    pub index: usize,
    /// Encoded image payload (PNG or JPEG), exactly as it will be submitted.
    pub bytes: Vec<u8>,
    /// Decoded pixel width.
    pub width: u32,
    /// Decoded pixel height.
    pub height: u32,
}

impl PageImage {
    /// Construct from parts the caller already validated (e.g. an in-process
    /// rasteriser that knows its output dimensions).
    pub fn new(index: usize, bytes: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            index,
            bytes,
            width,
            height,
        }
    }

    /// Construct from raw encoded bytes, probing dimensions from the image
    /// header. `origin` is only used for error messages.
    pub fn from_bytes(index: usize, bytes: Vec<u8>, origin: &Path) -> Result<Self, DeedscanError> {
        let (width, height) = probe_dimensions(&bytes).map_err(|e| {
            DeedscanError::UnreadableImage {
                path: origin.to_path_buf(),
                detail: e.to_string(),
            }
        })?;
        Ok(Self {
            index,
            bytes,
            width,
            height,
        })
    }

    /// Read one page image from disk.
    pub async fn load(index: usize, path: impl AsRef<Path>) -> Result<Self, DeedscanError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DeedscanError::ImageNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => DeedscanError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => DeedscanError::Internal(format!("reading '{}': {e}", path.display())),
        })?;

        let page = Self::from_bytes(index, bytes, path)?;
        debug!(
            "Loaded page {} from '{}': {}x{}, {} bytes",
            index,
            path.display(),
            page.width,
            page.height,
            page.byte_size()
        );
        Ok(page)
    }

    /// Size of the encoded payload in bytes. This is the quantity the batch
    /// planner budgets against, not the decoded pixel size.
    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }

    /// MIME type guessed from the payload's magic bytes.
    ///
    /// Falls back to `image/png` when the format is unrecognised — the API
    /// rejects the payload either way, and a wrong label fails faster than
    /// a missing one.
    pub fn media_type(&self) -> &'static str {
        match image::guess_format(&self.bytes) {
            Ok(image::ImageFormat::Jpeg) => "image/jpeg",
            _ => "image/png",
        }
    }
}

/// Decode just enough of the header to learn width and height.
fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), image::ImageError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .into_dimensions()
}

/// Load an ordered sequence of page images from file paths.
///
/// The position of each path in `paths` becomes the page index; callers are
/// responsible for supplying paths in page order (the CLI sorts its inputs).
pub async fn load_ordered(paths: &[PathBuf]) -> Result<Vec<PageImage>, DeedscanError> {
    let mut pages = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        pages.push(PageImage::load(index, path).await?);
    }
    Ok(pages)
}
