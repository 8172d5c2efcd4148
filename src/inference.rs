use crate::error::PredictError;
use crate::nn::Architecture;
use image::imageops::FilterType;
use ndarray::{Array, Array4, Axis};
use serde::Serialize;
use std::io::Cursor;

pub const INPUT_SIZE: usize = 224;

// ImageNet statistics, matching the training-side transform
const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// The in-memory, ready-to-evaluate model handle. Never mutated after
/// construction; concurrent predictions need no locking.
#[derive(Debug)]
pub struct Classifier {
    architecture: Architecture,
    num_classes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub prediction: usize,
    pub confidence: f32,
    pub probs: Vec<Vec<f32>>,
}

impl Classifier {
    pub(crate) fn new(architecture: Architecture, num_classes: usize) -> Self {
        Self {
            architecture,
            num_classes,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// One image per call: preprocess, forward pass, softmax, arg-max.
    pub fn predict(&self, image_bytes: &[u8]) -> Result<Prediction, PredictError> {
        let input = preprocess(image_bytes)?;

        let logits = self
            .architecture
            .forward(&input)
            .map_err(PredictError::InferenceFailed)?;
        let row: Vec<f32> = logits.index_axis(Axis(0), 0).iter().copied().collect();

        let probs = softmax(&row);
        let (prediction, confidence) = probs
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| PredictError::InferenceFailed("empty probability vector".into()))?;

        Ok(Prediction {
            prediction,
            confidence,
            probs: vec![probs],
        })
    }
}

fn preprocess(image_bytes: &[u8]) -> Result<Array4<f32>, PredictError> {
    let reader = image::ImageReader::new(Cursor::new(image_bytes))
        .with_guessed_format()
        .map_err(|e| PredictError::InvalidImage(e.to_string()))?;
    let img = reader
        .decode()
        .map_err(|e| PredictError::InvalidImage(e.to_string()))?;
    let img = img.resize_exact(INPUT_SIZE as u32, INPUT_SIZE as u32, FilterType::CatmullRom);
    let rgb = img.to_rgb8();

    let mut input = Array::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = ((r as f32) / 255. - CHANNEL_MEAN[0]) / CHANNEL_STD[0];
        input[[0, 1, y, x]] = ((g as f32) / 255. - CHANNEL_MEAN[1]) / CHANNEL_STD[1];
        input[[0, 2, y, x]] = ((b as f32) / 255. - CHANNEL_MEAN[2]) / CHANNEL_STD[2];
    }

    Ok(input)
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();

    exps.iter().map(|v| v / total).collect()
}
