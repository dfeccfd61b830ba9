//! Panorama stitching: the engine seam, the attempt plan and its fallback loop.
//!
//! The vision work (contrast enhancement, features, homographies, warping,
//! blending, border detection) belongs to the engine. This module decides what
//! to feed it and in which order.

#[cfg(feature = "opencv")]
mod opencv_engine;

use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use image::RgbImage;
use tracing::{info, warn};

use crate::image_processing;

#[cfg(feature = "opencv")]
pub use self::opencv_engine::OpenCvStitcher;

/// Geometry assumption handed to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StitchMode {
    /// Rotating camera, spherical projection.
    Panorama,
    /// Flat scenes such as document scans, affine model.
    Scans,
}

impl StitchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StitchMode::Panorama => "panorama",
            StitchMode::Scans => "scans",
        }
    }

    pub fn preset(self) -> StitchPreset {
        match self {
            StitchMode::Panorama => StitchPreset {
                registration_resol: 0.6,
                seam_estimation_resol: 0.1,
                compositing_resol: StitchPreset::ORIGINAL_RESOLUTION,
                pano_confidence_thresh: 1.0,
            },
            StitchMode::Scans => StitchPreset {
                registration_resol: 0.6,
                seam_estimation_resol: 0.1,
                compositing_resol: StitchPreset::ORIGINAL_RESOLUTION,
                pano_confidence_thresh: 0.5,
            },
        }
    }
}

/// Resolutions are in megapixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StitchPreset {
    pub registration_resol: f64,
    pub seam_estimation_resol: f64,
    pub compositing_resol: f64,
    pub pano_confidence_thresh: f64,
}

impl StitchPreset {
    /// Composite at the input resolution.
    pub const ORIGINAL_RESOLUTION: f64 = -1.0;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputVariant {
    /// Contrast-equalized copies, easier for feature detection.
    Enhanced,
    /// Resized originals with untouched colors.
    Original,
}

impl InputVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            InputVariant::Enhanced => "enhanced",
            InputVariant::Original => "original",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StitchAttempt {
    pub mode: StitchMode,
    pub preset: StitchPreset,
    pub input: InputVariant,
}

/// Non-success statuses reported by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StitchStatus {
    NeedMoreImages,
    HomographyEstimationFailed,
    CameraParamsAdjustFailed,
    Other(i32),
}

impl StitchStatus {
    /// Maps an engine status code; `0` is success and yields `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => None,
            1 => Some(StitchStatus::NeedMoreImages),
            2 => Some(StitchStatus::HomographyEstimationFailed),
            3 => Some(StitchStatus::CameraParamsAdjustFailed),
            other => Some(StitchStatus::Other(other)),
        }
    }

    pub fn message(&self) -> String {
        match self {
            StitchStatus::NeedMoreImages => "Need more images to stitch a panorama".to_string(),
            StitchStatus::HomographyEstimationFailed => {
                "Homography estimation failed; the images may not overlap enough".to_string()
            }
            StitchStatus::CameraParamsAdjustFailed => "Camera parameter adjustment failed".to_string(),
            StitchStatus::Other(code) => format!("Stitching failed with code {code}"),
        }
    }
}

impl fmt::Display for StitchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

pub enum StitchOutcome {
    Stitched(RgbImage),
    Failed(StitchStatus),
}

/// A panorama stitching backend. Calls block, so callers run them off the reactor.
///
/// Camera geometry is estimated on `geometry`; the panorama is composited from
/// `composite`. Both slices hold the same scenes in the same order and sizes,
/// and are often the same slice.
pub trait StitchEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Contrast-equalized copy of `image` with the same dimensions.
    fn enhance(&self, image: &RgbImage) -> Result<RgbImage>;

    /// Crops `panorama` to the bounding box of its largest non-black region.
    fn crop_borders(&self, panorama: &RgbImage) -> Result<RgbImage>;

    fn stitch(
        &self,
        geometry: &[RgbImage],
        composite: &[RgbImage],
        mode: StitchMode,
        preset: &StitchPreset,
    ) -> Result<StitchOutcome>;
}

/// Stand-in used when the binary is built with `--no-default-features`.
pub struct UnavailableStitcher;

fn unavailable() -> anyhow::Error {
    anyhow!("no stitching engine available; rebuild with the `opencv` feature")
}

impl StitchEngine for UnavailableStitcher {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn enhance(&self, _: &RgbImage) -> Result<RgbImage> {
        Err(unavailable())
    }

    fn crop_borders(&self, _: &RgbImage) -> Result<RgbImage> {
        Err(unavailable())
    }

    fn stitch(
        &self,
        _: &[RgbImage],
        _: &[RgbImage],
        _: StitchMode,
        _: &StitchPreset,
    ) -> Result<StitchOutcome> {
        Err(unavailable())
    }
}

#[cfg(feature = "opencv")]
pub fn default_engine() -> Arc<dyn StitchEngine> {
    Arc::new(OpenCvStitcher)
}

#[cfg(not(feature = "opencv"))]
pub fn default_engine() -> Arc<dyn StitchEngine> {
    Arc::new(UnavailableStitcher)
}

/// Engine inputs derived from the decoded uploads.
pub struct PreparedImages {
    pub original: Vec<RgbImage>,
    pub enhanced: Option<Vec<RgbImage>>,
}

impl PreparedImages {
    pub fn variant(&self, input: InputVariant) -> Option<&[RgbImage]> {
        match input {
            InputVariant::Original => Some(&self.original),
            InputVariant::Enhanced => self.enhanced.as_deref(),
        }
    }
}

/// Resizes every image and, when `preprocess` is on, has the engine build the
/// equalized copies.
pub fn prepare_images(
    engine: &dyn StitchEngine,
    decoded: Vec<RgbImage>,
    max_dimension: u32,
    preprocess: bool,
) -> Result<PreparedImages> {
    if !preprocess {
        return Ok(PreparedImages {
            original: decoded,
            enhanced: None,
        });
    }
    let original: Vec<RgbImage> = decoded
        .iter()
        .map(|image| image_processing::downscale_to_max(image, max_dimension))
        .collect();
    let enhanced = original
        .iter()
        .map(|image| engine.enhance(image))
        .collect::<Result<Vec<_>>>()?;
    Ok(PreparedImages {
        original,
        enhanced: Some(enhanced),
    })
}

pub fn attempt_plan(with_enhanced: bool) -> Vec<StitchAttempt> {
    let mut plan = Vec::new();
    for mode in [StitchMode::Panorama, StitchMode::Scans] {
        if with_enhanced {
            plan.push(StitchAttempt {
                mode,
                preset: mode.preset(),
                input: InputVariant::Enhanced,
            });
        }
        plan.push(StitchAttempt {
            mode,
            preset: mode.preset(),
            input: InputVariant::Original,
        });
    }
    plan
}

#[derive(Debug)]
pub enum StitchFailure {
    /// The last attempt finished with a non-success status.
    Status(StitchStatus),
    /// The last attempt raised an engine error.
    Engine(anyhow::Error),
}

/// Runs the attempt plan in order and returns the first panorama produced.
pub fn stitch_with_fallback(
    engine: &dyn StitchEngine,
    prepared: &PreparedImages,
) -> Result<RgbImage, StitchFailure> {
    let plan = attempt_plan(prepared.enhanced.is_some());
    let mut last_failure = StitchFailure::Status(StitchStatus::NeedMoreImages);

    for (index, attempt) in plan.iter().enumerate() {
        let Some(images) = prepared.variant(attempt.input) else {
            continue;
        };
        let composite = prepared.variant(InputVariant::Original).unwrap_or(images);
        info!(
            engine = engine.name(),
            attempt = index + 1,
            mode = attempt.mode.as_str(),
            input = attempt.input.as_str(),
            images = images.len(),
            "stitch attempt"
        );
        match engine.stitch(images, composite, attempt.mode, &attempt.preset) {
            Ok(StitchOutcome::Stitched(panorama)) => {
                info!(
                    attempt = index + 1,
                    width = panorama.width(),
                    height = panorama.height(),
                    "stitch succeeded"
                );
                return Ok(panorama);
            }
            Ok(StitchOutcome::Failed(status)) => {
                warn!(attempt = index + 1, %status, "stitch attempt failed");
                last_failure = StitchFailure::Status(status);
            }
            Err(err) => {
                warn!(attempt = index + 1, error = %err, "stitch engine error");
                last_failure = StitchFailure::Engine(err);
            }
        }
    }
    Err(last_failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records each call and replays scripted results.
    struct ScriptedEngine {
        script: Mutex<Vec<Result<StitchOutcome>>>,
        calls: Mutex<Vec<(StitchMode, u8, u8)>>,
    }

    impl ScriptedEngine {
        fn new(script: Vec<Result<StitchOutcome>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().rev().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl StitchEngine for ScriptedEngine {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn enhance(&self, image: &RgbImage) -> Result<RgbImage> {
            let (width, height) = image.dimensions();
            Ok(RgbImage::from_pixel(width, height, image::Rgb([1, 1, 1])))
        }

        fn crop_borders(&self, panorama: &RgbImage) -> Result<RgbImage> {
            Ok(panorama.clone())
        }

        fn stitch(
            &self,
            geometry: &[RgbImage],
            composite: &[RgbImage],
            mode: StitchMode,
            _: &StitchPreset,
        ) -> Result<StitchOutcome> {
            // First pixel tells enhanced (1) and original (0) inputs apart.
            let marker = |images: &[RgbImage]| images[0].get_pixel(0, 0)[0];
            self.calls
                .lock()
                .unwrap()
                .push((mode, marker(geometry), marker(composite)));
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(StitchOutcome::Failed(StitchStatus::Other(-1))))
        }
    }

    fn prepared() -> PreparedImages {
        let marked = |v| vec![RgbImage::from_pixel(4, 4, image::Rgb([v, v, v])); 2];
        PreparedImages {
            original: marked(0),
            enhanced: Some(marked(1)),
        }
    }

    #[test]
    fn plan_orders_enhanced_before_original_per_mode() {
        let plan = attempt_plan(true);
        let order: Vec<_> = plan.iter().map(|a| (a.mode, a.input)).collect();
        assert_eq!(
            order,
            vec![
                (StitchMode::Panorama, InputVariant::Enhanced),
                (StitchMode::Panorama, InputVariant::Original),
                (StitchMode::Scans, InputVariant::Enhanced),
                (StitchMode::Scans, InputVariant::Original),
            ]
        );
        assert_eq!(attempt_plan(false).len(), 2);
        assert!(plan[2].preset.pano_confidence_thresh < plan[0].preset.pano_confidence_thresh);
    }

    #[test]
    fn stops_at_first_success() {
        let engine = ScriptedEngine::new(vec![
            Ok(StitchOutcome::Failed(StitchStatus::HomographyEstimationFailed)),
            Ok(StitchOutcome::Stitched(RgbImage::new(8, 4))),
        ]);
        let panorama = stitch_with_fallback(&engine, &prepared()).unwrap();
        assert_eq!(panorama.dimensions(), (8, 4));
        assert_eq!(
            *engine.calls.lock().unwrap(),
            vec![(StitchMode::Panorama, 1, 0), (StitchMode::Panorama, 0, 0)]
        );
    }

    #[test]
    fn surfaces_last_status_when_all_attempts_fail() {
        let engine = ScriptedEngine::new(vec![
            Ok(StitchOutcome::Failed(StitchStatus::NeedMoreImages)),
            Err(anyhow!("boom")),
            Ok(StitchOutcome::Failed(StitchStatus::HomographyEstimationFailed)),
            Ok(StitchOutcome::Failed(StitchStatus::CameraParamsAdjustFailed)),
        ]);
        match stitch_with_fallback(&engine, &prepared()) {
            Err(StitchFailure::Status(status)) => {
                assert_eq!(status, StitchStatus::CameraParamsAdjustFailed)
            }
            _ => panic!("expected status failure"),
        }
        assert_eq!(engine.calls.lock().unwrap().len(), 4);
    }

    #[test]
    fn engine_error_on_last_attempt_is_surfaced() {
        let engine = ScriptedEngine::new(vec![
            Ok(StitchOutcome::Failed(StitchStatus::NeedMoreImages)),
            Err(anyhow!("engine crashed")),
        ]);
        let prepared = PreparedImages {
            enhanced: None,
            ..prepared()
        };
        match stitch_with_fallback(&engine, &prepared) {
            Err(StitchFailure::Engine(err)) => assert_eq!(err.to_string(), "engine crashed"),
            _ => panic!("expected engine failure"),
        }
    }

    #[test]
    fn status_codes_map_to_messages() {
        assert_eq!(StitchStatus::from_code(0), None);
        assert_eq!(
            StitchStatus::from_code(2).map(|s| s.message()),
            Some("Homography estimation failed; the images may not overlap enough".to_string())
        );
        assert_eq!(
            StitchStatus::from_code(42).map(|s| s.message()),
            Some("Stitching failed with code 42".to_string())
        );
    }

    #[test]
    fn prepare_skips_enhancement_when_disabled() {
        let images = vec![RgbImage::new(3000, 1000), RgbImage::new(3000, 1000)];
        let prepared = prepare_images(&ScriptedEngine::new(vec![]), images, 1500, false).unwrap();
        assert!(prepared.enhanced.is_none());
        assert_eq!(prepared.original[0].dimensions(), (3000, 1000));
    }

    #[test]
    fn prepare_resizes_and_enhances() {
        let images = vec![RgbImage::new(300, 100), RgbImage::new(120, 240)];
        let prepared = prepare_images(&ScriptedEngine::new(vec![]), images, 150, true).unwrap();
        assert_eq!(prepared.original[0].dimensions(), (150, 50));
        assert_eq!(prepared.original[1].dimensions(), (75, 150));
        let enhanced = prepared.enhanced.unwrap();
        assert_eq!(enhanced[1].dimensions(), (75, 150));
        assert_eq!(enhanced[1].get_pixel(0, 0), &image::Rgb([1, 1, 1]));
    }

    #[test]
    fn prepare_fails_when_engine_cannot_enhance() {
        let images = vec![RgbImage::new(10, 10), RgbImage::new(10, 10)];
        assert!(prepare_images(&UnavailableStitcher, images, 1600, true).is_err());
    }

    #[test]
    fn unavailable_engine_always_errors() {
        let result =
            UnavailableStitcher.stitch(&[], &[], StitchMode::Panorama, &StitchMode::Panorama.preset());
        assert!(result.is_err());
        assert!(UnavailableStitcher.enhance(&RgbImage::new(2, 2)).is_err());
        assert!(UnavailableStitcher.crop_borders(&RgbImage::new(2, 2)).is_err());
    }
}
