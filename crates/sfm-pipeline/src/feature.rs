//! Detected keypoints and the detector collaborator.

use crate::scene::MapPointId;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use sfm_core::{Pt2, Real};
use std::collections::VecDeque;

/// Sign of the detector response; only features of equal sign may match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Contrast {
    Positive,
    Negative,
}

/// One detected 2D keypoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Pixel position in the distorted image.
    pub pix: Pt2,
    pub scale: Real,
    pub orientation: Real,
    pub contrast: Contrast,
    /// Unit-length descriptor.
    pub descriptor: Vec<f32>,
    /// Bit `i` is set when descriptor component `i` (mod 64) is above the mean.
    pub signature: u64,
    /// Map point this feature currently supports.
    pub mpnt: Option<MapPointId>,
}

impl Feature {
    /// Build a feature, normalizing the descriptor and deriving its signature.
    pub fn new(
        pix: Pt2,
        scale: Real,
        orientation: Real,
        contrast: Contrast,
        mut descriptor: Vec<f32>,
    ) -> Self {
        let norm = descriptor.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            descriptor.iter_mut().for_each(|v| *v /= norm);
        }
        let signature = signature_of(&descriptor);
        Self {
            pix,
            scale,
            orientation,
            contrast,
            descriptor,
            signature,
            mpnt: None,
        }
    }

    /// Descriptor correlation; `1.0` for identical unit descriptors.
    pub fn similarity(&self, other: &Feature) -> f32 {
        self.descriptor
            .iter()
            .zip(&other.descriptor)
            .map(|(a, b)| a * b)
            .sum()
    }

    pub fn hamming(&self, other: &Feature) -> u32 {
        (self.signature ^ other.signature).count_ones()
    }
}

/// 64-bit binary signature of a descriptor, used as a matching pre-filter.
pub fn signature_of(descriptor: &[f32]) -> u64 {
    if descriptor.is_empty() {
        return 0;
    }
    let mean = descriptor.iter().sum::<f32>() / descriptor.len() as f32;
    descriptor
        .iter()
        .enumerate()
        .filter(|(_, &v)| v > mean)
        .fold(0u64, |sig, (i, _)| sig ^ (1u64 << (i % 64)))
}

/// Extracts features from a captured image.
pub trait FeatureDetector {
    fn detect(&mut self, image: &RgbImage) -> Vec<Feature>;
}

/// Replays precomputed feature lists, one per `detect` call, in order.
///
/// Returns an empty list once the queue is exhausted.
#[derive(Debug, Clone, Default)]
pub struct QueueDetector {
    queue: VecDeque<Vec<Feature>>,
}

impl QueueDetector {
    pub fn new(lists: impl IntoIterator<Item = Vec<Feature>>) -> Self {
        Self {
            queue: lists.into_iter().collect(),
        }
    }

    pub fn push(&mut self, features: Vec<Feature>) {
        self.queue.push_back(features);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl FeatureDetector for QueueDetector {
    fn detect(&mut self, _image: &RgbImage) -> Vec<Feature> {
        self.queue.pop_front().unwrap_or_default()
    }
}
