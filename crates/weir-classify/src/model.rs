//! # Classifier model blob
//!
//! Training happens elsewhere and hands over a JSON artifact: the feature
//! column order, the class label encoder, a standard scaler and the
//! multinomial-logistic weights. Inference is a dot product and a
//! softmax — no runtime dependency on the training stack.
//!
//! Feature vectors are assembled in the declared column order with
//! missing columns zero-filled, then scaled with the stored mean/scale
//! before the linear layer.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use weir_common::class::TrafficClass;

use crate::ClassifyError;

#[derive(Debug, Clone, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

/// The serialised model artifact.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelBlob {
    pub feature_order: Vec<String>,
    /// Class labels in weight-row order.
    pub classes: Vec<String>,
    pub scaler: Scaler,
    /// `classes × features` weight matrix.
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
}

/// One inference result.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class: TrafficClass,
    /// The raw label from the blob (kept for labels outside the closed set).
    pub label: String,
    /// Max probability.
    pub confidence: f64,
    pub probabilities: Vec<f64>,
}

/// A validated, ready-to-run classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    blob: ModelBlob,
}

impl Classifier {
    pub fn load(path: &Path) -> Result<Self, ClassifyError> {
        let file = std::fs::File::open(path).map_err(|e| ClassifyError::io(path, e))?;
        let blob: ModelBlob = serde_json::from_reader(std::io::BufReader::new(file))?;
        let classifier = Self::from_blob(blob)?;
        info!(
            path = %path.display(),
            classes = classifier.blob.classes.len(),
            features = classifier.blob.feature_order.len(),
            "classifier model loaded"
        );
        Ok(classifier)
    }

    pub fn from_blob(blob: ModelBlob) -> Result<Self, ClassifyError> {
        let features = blob.feature_order.len();
        let classes = blob.classes.len();
        if classes == 0 || features == 0 {
            return Err(ClassifyError::Model(
                "model needs at least one class and one feature".into(),
            ));
        }
        if blob.scaler.mean.len() != features || blob.scaler.scale.len() != features {
            return Err(ClassifyError::Model(format!(
                "scaler dimensions {}/{} do not match {features} features",
                blob.scaler.mean.len(),
                blob.scaler.scale.len()
            )));
        }
        if blob.coefficients.len() != classes || blob.intercepts.len() != classes {
            return Err(ClassifyError::Model(format!(
                "{} weight rows / {} intercepts for {classes} classes",
                blob.coefficients.len(),
                blob.intercepts.len()
            )));
        }
        if let Some(row) = blob.coefficients.iter().find(|r| r.len() != features) {
            return Err(ClassifyError::Model(format!(
                "weight row has {} columns, expected {features}",
                row.len()
            )));
        }
        Ok(Classifier { blob })
    }

    pub fn classes(&self) -> &[String] {
        &self.blob.classes
    }

    /// Classify one feature row.
    pub fn predict(&self, features: &HashMap<String, f64>) -> Prediction {
        let x: Vec<f64> = self
            .blob
            .feature_order
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let raw = features.get(name).copied().unwrap_or(0.0);
                let scale = self.blob.scaler.scale[i];
                let centered = raw - self.blob.scaler.mean[i];
                if scale > 0.0 {
                    centered / scale
                } else {
                    centered
                }
            })
            .collect();

        let logits: Vec<f64> = self
            .blob
            .coefficients
            .iter()
            .zip(&self.blob.intercepts)
            .map(|(row, b)| row.iter().zip(&x).map(|(w, v)| w * v).sum::<f64>() + b)
            .collect();
        let probabilities = softmax(&logits);

        // First max wins, so equal logits classify deterministically.
        let (best, confidence) = probabilities
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |(bi, bv), (i, &v)| {
                if v > bv {
                    (i, v)
                } else {
                    (bi, bv)
                }
            });
        let label = self.blob.classes[best].clone();
        Prediction {
            class: TrafficClass::from_label(&label).unwrap_or(TrafficClass::Unknown),
            label,
            confidence,
            probabilities,
        }
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|&e| e / sum).collect()
}
