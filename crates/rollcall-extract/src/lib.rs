//! ONNX-backed face embedding extraction.
//!
//! One decoded image in, one L2-normalised embedding per detected face out.
//! Two sessions: a single-stage face detector (stride-anchored decode + NMS)
//! and an ArcFace-style embedding network fed 112×112 square crops. Faces
//! are cropped with a margin around the detection box; detection landmarks
//! are not used.

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

use rollcall_core::{Embedding, ExtractionError};

const DET_INPUT_SIZE: usize = 640;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DET_NMS_THRESHOLD: f32 = 0.4;
const DET_STRIDES: [usize; 3] = [8, 16, 32];
const DET_ANCHORS_PER_CELL: usize = 2;

const EMBED_INPUT_SIZE: usize = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5;
/// Extra context around the detection box before the square crop.
const CROP_MARGIN: f32 = 0.25;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("could not decode image")]
    DecodeFailed,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("expected {expected}-dim embedding, got {got}")]
    BadDimension { expected: usize, got: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<ExtractError> for ExtractionError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::DecodeFailed => ExtractionError::DecodeFailed,
            other => ExtractionError::Backend(other.to_string()),
        }
    }
}

/// One detected face in source-image pixel coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Coordinate de-mapping metadata for the letterbox resize.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Detector + embedder pair behind one `extract_all` call.
pub struct OnnxExtractor {
    detector: Session,
    embedder: Session,
    embedding_dim: usize,
}

impl OnnxExtractor {
    /// Load both ONNX models. Fails fast if either file is missing.
    pub fn load(
        detector_path: &str,
        embedder_path: &str,
        embedding_dim: usize,
    ) -> Result<Self, ExtractError> {
        for path in [detector_path, embedder_path] {
            if !Path::new(path).exists() {
                return Err(ExtractError::ModelNotFound(path.to_string()));
            }
        }

        let detector = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(detector_path)?;
        let embedder = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(embedder_path)?;

        // Positional output layout: scores for strides [8, 16, 32], then
        // bboxes. Models also emitting landmark tensors are fine; the
        // extras are ignored.
        let num_outputs = detector.outputs().len();
        if num_outputs < 2 * DET_STRIDES.len() {
            return Err(ExtractError::InferenceFailed(format!(
                "detector must emit score and bbox tensors per stride, got {num_outputs} outputs"
            )));
        }

        tracing::info!(
            detector = detector_path,
            embedder = embedder_path,
            dim = embedding_dim,
            "extraction models loaded"
        );

        Ok(Self {
            detector,
            embedder,
            embedding_dim,
        })
    }

    /// Decode the image, detect every face, embed each one.
    ///
    /// Returns embeddings in descending detection-confidence order; an
    /// image with no faces yields an empty vector, not an error.
    pub fn extract_all(&mut self, image_bytes: &[u8]) -> Result<Vec<Embedding>, ExtractError> {
        let rgb = image::load_from_memory(image_bytes)
            .map_err(|_| ExtractError::DecodeFailed)?
            .to_rgb8();

        let faces = self.detect(&rgb)?;
        tracing::debug!(faces = faces.len(), "detection complete");

        let mut embeddings = Vec::with_capacity(faces.len());
        for face in &faces {
            embeddings.push(self.embed(&rgb, face)?);
        }
        Ok(embeddings)
    }

    fn detect(&mut self, rgb: &RgbImage) -> Result<Vec<Detection>, ExtractError> {
        let (input, letterbox) = detect_tensor(rgb);

        let outputs = self
            .detector
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();
        for (pos, &stride) in DET_STRIDES.iter().enumerate() {
            let (_, scores) = outputs[pos]
                .try_extract_tensor::<f32>()
                .map_err(|e| ExtractError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[pos + DET_STRIDES.len()]
                .try_extract_tensor::<f32>()
                .map_err(|e| ExtractError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                DET_CONFIDENCE_THRESHOLD,
            ));
        }

        let mut kept = nms(detections, DET_NMS_THRESHOLD);
        kept.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(kept)
    }

    fn embed(&mut self, rgb: &RgbImage, face: &Detection) -> Result<Embedding, ExtractError> {
        let (cx, cy, side) = crop_region(rgb.width(), rgb.height(), face);
        let crop = image::imageops::crop_imm(rgb, cx, cy, side, side).to_image();
        let resized = image::imageops::resize(
            &crop,
            EMBED_INPUT_SIZE as u32,
            EMBED_INPUT_SIZE as u32,
            FilterType::Triangle,
        );
        let input = preprocess_crop(&resized);

        let outputs = self
            .embedder
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != self.embedding_dim {
            return Err(ExtractError::BadDimension {
                expected: self.embedding_dim,
                got: raw.len(),
            });
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// Letterbox an RGB image into the detector's square input tensor.
/// Padding normalises to 0.0, so the zeroed tensor needs no fill pass.
fn detect_tensor(rgb: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let (new_w, new_h, letterbox) = letterbox_dims(width, height);

    let resized = image::imageops::resize(rgb, new_w as u32, new_h as u32, FilterType::Triangle);

    let pad_x = letterbox.pad_x.floor() as usize;
    let pad_y = letterbox.pad_y.floor() as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, DET_INPUT_SIZE, DET_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (pad_x + x as usize, pad_y + y as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - DET_MEAN) / DET_STD;
        }
    }
    (tensor, letterbox)
}

fn letterbox_dims(width: usize, height: usize) -> (usize, usize, Letterbox) {
    let scale_w = DET_INPUT_SIZE as f32 / width as f32;
    let scale_h = DET_INPUT_SIZE as f32 / height as f32;
    let scale = scale_w.min(scale_h);

    let new_w = ((width as f32 * scale).round() as usize).max(1);
    let new_h = ((height as f32 * scale).round() as usize).max(1);
    let letterbox = Letterbox {
        scale,
        pad_x: (DET_INPUT_SIZE - new_w) as f32 / 2.0,
        pad_y: (DET_INPUT_SIZE - new_h) as f32 / 2.0,
    };
    (new_w, new_h, letterbox)
}

/// Decode one stride's anchor-free outputs: `bboxes` holds per-anchor
/// [left, top, right, bottom] distances in stride units from the cell
/// centre. Coordinates are mapped back through the letterbox.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Detection> {
    let cells_per_row = DET_INPUT_SIZE / stride;
    let mut out = Vec::new();

    for (i, &score) in scores.iter().enumerate() {
        if score < threshold || bboxes.len() < (i + 1) * 4 {
            continue;
        }
        let cell = i / DET_ANCHORS_PER_CELL;
        let cx = ((cell % cells_per_row) * stride) as f32;
        let cy = ((cell / cells_per_row) * stride) as f32;

        let s = stride as f32;
        let x1 = cx - bboxes[i * 4] * s;
        let y1 = cy - bboxes[i * 4 + 1] * s;
        let x2 = cx + bboxes[i * 4 + 2] * s;
        let y2 = cy + bboxes[i * 4 + 3] * s;

        out.push(Detection {
            x: (x1 - letterbox.pad_x) / letterbox.scale,
            y: (y1 - letterbox.pad_y) / letterbox.scale,
            width: (x2 - x1) / letterbox.scale,
            height: (y2 - y1) / letterbox.scale,
            confidence: score,
        });
    }
    out
}

fn iou(a: &Detection, b: &Detection) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Greedy non-maximum suppression, strongest detection first.
fn nms(mut detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::new();
    for det in detections {
        if kept.iter().all(|k| iou(k, &det) < threshold) {
            kept.push(det);
        }
    }
    kept
}

/// Square crop around the detection with margin, clamped to image bounds.
/// Returns (x, y, side) in pixels.
fn crop_region(img_w: u32, img_h: u32, face: &Detection) -> (u32, u32, u32) {
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;
    let side = (face.width.max(face.height) * (1.0 + CROP_MARGIN))
        .min(img_w.min(img_h) as f32)
        .max(1.0);

    let half = side / 2.0;
    let x = (cx - half).clamp(0.0, img_w as f32 - side);
    let y = (cy - half).clamp(0.0, img_h as f32 - side);
    (x as u32, y as u32, side as u32)
}

/// 112×112 RGB crop → NCHW float tensor with symmetric normalisation.
fn preprocess_crop(crop: &RgbImage) -> Array4<f32> {
    let size = EMBED_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - EMBED_MEAN) / EMBED_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}
