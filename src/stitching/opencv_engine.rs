use anyhow::{Result, anyhow};
use image::{RgbImage, imageops};
use opencv::core::{self, Mat, Point, Vector};
use opencv::imgproc;
use opencv::prelude::*;
use opencv::stitching::{Stitcher, Stitcher_Mode, Stitcher_Status};

use super::{StitchEngine, StitchMode, StitchOutcome, StitchPreset, StitchStatus};

const CLAHE_CLIP_LIMIT: f64 = 2.0;
const CLAHE_TILE_GRID: i32 = 8;

/// `cv::Stitcher` driven through the `opencv` bindings.
pub struct OpenCvStitcher;

fn to_rgb_mat(image: &RgbImage) -> opencv::Result<Mat> {
    let (width, height) = image.dimensions();
    let mut rgb = Mat::new_rows_cols_with_default(
        height as i32,
        width as i32,
        core::CV_8UC3,
        core::Scalar::all(0.0),
    )?;
    rgb.data_bytes_mut()?.copy_from_slice(image.as_raw());
    Ok(rgb)
}

fn to_bgr_mat(image: &RgbImage) -> opencv::Result<Mat> {
    let rgb = to_rgb_mat(image)?;
    let mut bgr = Mat::default();
    imgproc::cvt_color_def(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR)?;
    Ok(bgr)
}

fn to_mats(images: &[RgbImage]) -> opencv::Result<Vector<Mat>> {
    let mut mats = Vector::<Mat>::with_capacity(images.len());
    for image in images {
        mats.push(to_bgr_mat(image)?);
    }
    Ok(mats)
}

/// Copies a continuous 8-bit, 3-channel RGB `Mat` out into an `RgbImage`.
fn rgb_mat_to_image(rgb: &Mat) -> Result<RgbImage> {
    let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
    let bytes = rgb.data_bytes()?.to_vec();
    RgbImage::from_raw(width, height, bytes)
        .ok_or_else(|| anyhow!("image buffer does not match {width}x{height}"))
}

fn to_rgb_image(bgr: &Mat) -> Result<RgbImage> {
    let mut rgb = Mat::default();
    imgproc::cvt_color_def(bgr, &mut rgb, imgproc::COLOR_BGR2RGB)?;
    rgb_mat_to_image(&rgb)
}

fn status_of(status: Stitcher_Status) -> Option<StitchStatus> {
    StitchStatus::from_code(status as i32)
}

/// Bounding rect of the largest external contour of the non-black pixels.
fn largest_content_rect(rgb: &Mat) -> opencv::Result<Option<core::Rect>> {
    let mut gray = Mat::default();
    imgproc::cvt_color_def(rgb, &mut gray, imgproc::COLOR_RGB2GRAY)?;
    let mut mask = Mat::default();
    imgproc::threshold(&gray, &mut mask, 0.0, 255.0, imgproc::THRESH_BINARY)?;

    let mut contours = Vector::<Vector<Point>>::new();
    imgproc::find_contours(
        &mask,
        &mut contours,
        imgproc::RETR_EXTERNAL,
        imgproc::CHAIN_APPROX_SIMPLE,
        Point::default(),
    )?;

    let mut largest: Option<(f64, Vector<Point>)> = None;
    for contour in contours.iter() {
        let area = imgproc::contour_area(&contour, false)?;
        if largest.as_ref().is_none_or(|(best, _)| area > *best) {
            largest = Some((area, contour));
        }
    }
    largest
        .map(|(_, contour)| imgproc::bounding_rect(&contour))
        .transpose()
}

impl StitchEngine for OpenCvStitcher {
    fn name(&self) -> &'static str {
        "opencv"
    }

    /// CLAHE on the L channel of Lab, so hue and saturation stay put.
    fn enhance(&self, image: &RgbImage) -> Result<RgbImage> {
        let rgb = to_rgb_mat(image)?;
        let mut lab = Mat::default();
        imgproc::cvt_color_def(&rgb, &mut lab, imgproc::COLOR_RGB2Lab)?;

        let mut channels = Vector::<Mat>::new();
        core::split(&lab, &mut channels)?;
        let lightness = channels.get(0)?;
        let mut clahe = imgproc::create_clahe(
            CLAHE_CLIP_LIMIT,
            core::Size::new(CLAHE_TILE_GRID, CLAHE_TILE_GRID),
        )?;
        let mut equalized = Mat::default();
        clahe.apply(&lightness, &mut equalized)?;
        channels.set(0, equalized)?;

        let mut merged = Mat::default();
        core::merge(&channels, &mut merged)?;
        let mut output = Mat::default();
        imgproc::cvt_color_def(&merged, &mut output, imgproc::COLOR_Lab2RGB)?;
        rgb_mat_to_image(&output)
    }

    fn crop_borders(&self, panorama: &RgbImage) -> Result<RgbImage> {
        let rgb = to_rgb_mat(panorama)?;
        let Some(rect) = largest_content_rect(&rgb)? else {
            return Ok(panorama.clone());
        };
        Ok(imageops::crop_imm(
            panorama,
            rect.x as u32,
            rect.y as u32,
            rect.width as u32,
            rect.height as u32,
        )
        .to_image())
    }

    fn stitch(
        &self,
        geometry: &[RgbImage],
        composite: &[RgbImage],
        mode: StitchMode,
        preset: &StitchPreset,
    ) -> Result<StitchOutcome> {
        let cv_mode = match mode {
            StitchMode::Panorama => Stitcher_Mode::PANORAMA,
            StitchMode::Scans => Stitcher_Mode::SCANS,
        };
        let mut stitcher = Stitcher::create(cv_mode)?;
        stitcher.set_registration_resol(preset.registration_resol)?;
        stitcher.set_seam_estimation_resol(preset.seam_estimation_resol)?;
        stitcher.set_compositing_resol(preset.compositing_resol)?;
        stitcher.set_pano_confidence_thresh(preset.pano_confidence_thresh)?;

        let geometry_mats = to_mats(geometry)?;
        let mut panorama = Mat::default();

        if std::ptr::eq(geometry, composite) {
            if let Some(status) = status_of(stitcher.stitch(&geometry_mats, &mut panorama)?) {
                return Ok(StitchOutcome::Failed(status));
            }
        } else {
            if let Some(status) = status_of(stitcher.estimate_transform_def(&geometry_mats)?) {
                return Ok(StitchOutcome::Failed(status));
            }
            let composite_mats = to_mats(composite)?;
            if let Some(status) =
                status_of(stitcher.compose_panorama_images(&composite_mats, &mut panorama)?)
            {
                return Ok(StitchOutcome::Failed(status));
            }
        }

        if panorama.empty() {
            return Err(anyhow!("stitcher reported success but produced an empty image"));
        }
        Ok(StitchOutcome::Stitched(to_rgb_image(&panorama)?))
    }
}
