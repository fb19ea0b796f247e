//! Face localization capability boundary.
//!
//! Real detectors (cascade classifiers, deep detectors) live outside this
//! crate and are injected at construction time. The engine only needs the
//! trait below.

use crate::types::FaceRegion;
use image::GrayImage;

/// Locates face regions in a grayscale image.
///
/// Regions come back in the detector's own preference order, best first,
/// expressed in the pixel coordinate space of the input. Callers take the
/// first region and never re-rank, so selection stays attributable to the
/// detector. An empty result is the "no face" signal; detection itself is
/// infallible.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &GrayImage) -> Vec<FaceRegion>;
}

/// Detector for pre-cropped portrait inputs: reports the whole frame as the
/// single face region.
pub struct FullFrameDetector;

impl FaceDetector for FullFrameDetector {
    fn detect(&self, image: &GrayImage) -> Vec<FaceRegion> {
        if image.width() == 0 || image.height() == 0 {
            return Vec::new();
        }
        vec![FaceRegion {
            x: 0,
            y: 0,
            width: image.width(),
            height: image.height(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_frame_covers_whole_image() {
        let image = GrayImage::new(64, 48);
        let regions = FullFrameDetector.detect(&image);
        assert_eq!(
            regions,
            vec![FaceRegion { x: 0, y: 0, width: 64, height: 48 }]
        );
    }

    #[test]
    fn test_full_frame_empty_image_has_no_face() {
        let image = GrayImage::new(0, 0);
        assert!(FullFrameDetector.detect(&image).is_empty());
    }
}
