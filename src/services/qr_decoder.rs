//! Extracts the payload of a QR code from an uploaded raster image.
//!
//! `image` rasterizes whatever format was uploaded into a greyscale buffer;
//! `rqrr` locates and decodes the QR grid. Nothing here touches the store:
//! resolving the payload to a record is the caller's job.

use std::io::Cursor;

use image::{io::Limits, ImageError};

/// Largest accepted width or height, in pixels.
pub const MAX_DIMENSION: u32 = 4096;

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("Uploaded file is not a readable image: {0}")]
    Unreadable(ImageError),

    #[error("Image is larger than 4096x4096 pixels")]
    TooLarge,

    #[error("No QR code found in image")]
    NotFound,
}

impl From<ImageError> for DecodeError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::Limits(_) => DecodeError::TooLarge,
            other => DecodeError::Unreadable(other),
        }
    }
}

/// Returns the string payload of the first decodable QR code in `bytes`.
///
/// CPU bound; async callers should run it on the blocking pool.
pub fn decode(bytes: &[u8]) -> Result<String, DecodeError> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DIMENSION);
    limits.max_image_height = Some(MAX_DIMENSION);

    let mut reader = image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(ImageError::IoError)?;
    reader.limits(limits);

    let luma = reader.decode()?.to_luma8();
    let (width, height) = luma.dimensions();

    let mut prepared =
        rqrr::PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
            luma.get_pixel(x as u32, y as u32).0[0]
        });

    let grids = prepared.detect_grids();
    tracing::debug!(width, height, grids = grids.len(), "Scanned image for QR grids");

    grids
        .iter()
        .find_map(|grid| match grid.decode() {
            Ok((_meta, content)) => Some(content),
            Err(e) => {
                tracing::debug!(error = ?e, "Skipping undecodable QR grid");
                None
            }
        })
        .ok_or(DecodeError::NotFound)
}
