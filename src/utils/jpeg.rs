use crate::utils::bbox::BoundingBox;
use crate::Errors;
use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ColorType, GrayImage, RgbImage};

/// Contrast boost applied to plate regions, in percent
pub const PLATE_CONTRAST: f32 = 200.0;

/// Brightness offset applied to plate regions
pub const PLATE_BRIGHTEN: i32 = 12;

/// Cuts the bounding box out of the frame.
///
/// The box is clamped to the frame first; a box that does not intersect the frame
/// produces [`Errors::EmptyCrop`].
///
pub fn crop(frame: &RgbImage, bbox: &BoundingBox) -> Result<RgbImage> {
    let (x, y, w, h) = bbox
        .clamp_to(frame.width(), frame.height())
        .ok_or(Errors::EmptyCrop)?;
    Ok(imageops::crop_imm(frame, x, y, w, h).to_image())
}

/// Encodes a color image as a display-grade JPEG
///
pub fn encode_rgb(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgb8,
    )?;
    Ok(buf)
}

pub fn encode_gray(image: &GrayImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::L8,
    )?;
    Ok(buf)
}

/// Prepares the part of a vehicle crop where the plate is expected for text recognition.
///
/// Takes the lower `fraction` of the crop, converts it to grayscale and raises contrast.
///
/// # Parameters
/// * `vehicle` - vehicle crop
/// * `fraction` - share of the crop height, counted from the bottom, in `(0, 1]`
///
pub fn plate_region(vehicle: &RgbImage, fraction: f32) -> Result<GrayImage> {
    let height = vehicle.height();
    let region_height = ((height as f32) * fraction.clamp(0.0, 1.0)).round() as u32;
    if region_height == 0 || vehicle.width() == 0 {
        return Err(Errors::EmptyCrop.into());
    }
    let region_y = height - region_height;
    let region = imageops::crop_imm(vehicle, 0, region_y, vehicle.width(), region_height).to_image();
    let gray = imageops::grayscale(&region);
    let contrasted = imageops::contrast(&gray, PLATE_CONTRAST);
    Ok(imageops::brighten(&contrasted, PLATE_BRIGHTEN))
}
