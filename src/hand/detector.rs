use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

use super::landmark::{HandLandmark, HandPose, Handedness, Landmark};

/// Source of detected hand poses for a frame.
///
/// The server core only depends on this seam; the ONNX-backed implementation
/// below is the production detector.
pub trait HandDetector: Send {
    /// Extract zero or more hand poses from an RGB frame.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<HandPose>>;
}

/// Model input edge length (square)
const INPUT_SIZE: u32 = 224;

/// Hand landmark detector backed by an ONNX model
pub struct OnnxHandDetector {
    session: Session,
    max_hands: usize,
    min_confidence: f32,
}

impl OnnxHandDetector {
    /// Load the ONNX model and configure detection limits
    pub fn new<P: AsRef<Path>>(model_path: P, max_hands: usize, min_confidence: f32) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path.as_ref())
            .context("Failed to load hand landmark ONNX model")?;

        Ok(Self {
            session,
            max_hands,
            min_confidence,
        })
    }

    /// Resize to the model input and scale pixels to [0, 1]
    ///
    /// Output layout: [1, 224, 224, 3]
    fn preprocess(image: &RgbImage) -> Array4<f32> {
        let resized = image::imageops::resize(image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
        let s = INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, s, s, 3));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, y as usize, x as usize, c]] = pixel.0[c] as f32 / 255.0;
            }
        }
        tensor
    }
}

impl HandDetector for OnnxHandDetector {
    /// Run inference on one frame.
    ///
    /// Model outputs:
    ///   "landmarks"  [1, N, 63]  x/y/z per landmark in input-pixel scale
    ///   "handedness" [1, N]      probability the hand is a right hand
    ///   "scores"     [1, N]      detection confidence
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<HandPose>> {
        let input = Self::preprocess(image);
        let input_tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs!["input" => input_tensor])
            .context("Inference failed")?;

        let landmarks: ndarray::ArrayViewD<f32> = outputs["landmarks"]
            .try_extract_array()
            .context("Failed to extract landmarks output")?;
        let handedness: ndarray::ArrayViewD<f32> = outputs["handedness"]
            .try_extract_array()
            .context("Failed to extract handedness output")?;
        let scores: ndarray::ArrayViewD<f32> = outputs["scores"]
            .try_extract_array()
            .context("Failed to extract scores output")?;

        let n_det = landmarks.shape()[1];
        let mut hands = Vec::new();

        for i in 0..n_det {
            if hands.len() >= self.max_hands {
                break;
            }
            let score = scores[[0, i]];
            if score < self.min_confidence {
                continue;
            }

            // Landmark coordinates come back in input-pixel scale; bring them
            // to camera-normalized coordinates like the rest of the pipeline.
            let mut points = [Landmark::default(); HandLandmark::COUNT];
            for (j, point) in points.iter_mut().enumerate() {
                let x = landmarks[[0, i, j * 3]];
                let y = landmarks[[0, i, j * 3 + 1]];
                let z = landmarks[[0, i, j * 3 + 2]];
                *point = Landmark::new(
                    x / INPUT_SIZE as f32,
                    y / INPUT_SIZE as f32,
                    z / INPUT_SIZE as f32,
                );
            }

            let side = if handedness[[0, i]] > 0.5 {
                Handedness::Right
            } else {
                Handedness::Left
            };

            hands.push(HandPose::new(points, side, score));
        }

        Ok(hands)
    }
}
