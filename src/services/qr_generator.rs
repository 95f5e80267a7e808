use base64::{engine::general_purpose::STANDARD, Engine};
use image::{ImageBuffer, Luma};
use qrcode::render::svg;
use qrcode::QrCode;

use crate::models::token::Token;

/// Target edge length of the PNG artifact, in pixels.
const TARGET_SIZE: u32 = 200;

/// Light modules around the code so scanners can find the finder patterns.
const QUIET_ZONE_MODULES: u32 = 2;

#[derive(thiserror::Error, Debug)]
pub enum QrGenerationError {
    #[error("QR code generation failed: {0}")]
    QrCodeError(#[from] qrcode::types::QrError),

    #[error("PNG encoding failed: {0}")]
    ImageError(#[from] image::ImageError),
}

/// Renders a token as a black-on-white PNG of roughly 200x200 pixels.
pub fn generate_qr_png(token: &Token) -> Result<Vec<u8>, QrGenerationError> {
    let code = QrCode::new(token.as_str().as_bytes())?;

    // Scale whole modules so edges stay crisp.
    let width = code.width() as u32;
    let total_modules = width + 2 * QUIET_ZONE_MODULES;
    let module_size = (TARGET_SIZE / total_modules).max(1);
    let img_size = total_modules * module_size;

    let mut img = ImageBuffer::<Luma<u8>, Vec<u8>>::new(img_size, img_size);

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let module_x = (x / module_size).checked_sub(QUIET_ZONE_MODULES);
        let module_y = (y / module_size).checked_sub(QUIET_ZONE_MODULES);

        let dark = match (module_x, module_y) {
            (Some(mx), Some(my)) if mx < width && my < width => {
                code[(mx as usize, my as usize)] == qrcode::types::Color::Dark
            }
            _ => false,
        };

        *pixel = if dark { Luma([0u8]) } else { Luma([255u8]) };
    }

    let mut png_data = Vec::new();
    image::DynamicImage::ImageLuma8(img).write_to(
        &mut std::io::Cursor::new(&mut png_data),
        image::ImageFormat::Png,
    )?;

    Ok(png_data)
}

/// Renders a token as a PNG data URL, the form stored on each record.
pub fn generate_qr_data_url(token: &Token) -> Result<String, QrGenerationError> {
    let png = generate_qr_png(token)?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}

/// Renders a token as an SVG document for printing.
pub fn generate_qr_svg(token: &Token) -> Result<String, QrGenerationError> {
    let code = QrCode::new(token.as_str().as_bytes())?;

    let svg = code
        .render::<svg::Color>()
        .min_dimensions(TARGET_SIZE, TARGET_SIZE)
        .build();

    Ok(svg)
}
