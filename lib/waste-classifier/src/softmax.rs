/*
 * Copyright (C) 2023 Asim Ihsan
 * SPDX-License-Identifier: AGPL-3.0-only
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Affero General Public License as published by the Free
 * Software Foundation, version 3.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A
 * PARTICULAR PURPOSE. See the GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License along
 * with this program. If not, see <https://www.gnu.org/licenses/>
 */

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::preprocess;
use crate::{ClassVocabulary, ClassifierError, ImageClassifier, ImageHandle, Prediction};

/// Weights of a linear softmax head: one row of `3 * input_size * input_size` weights and one
/// bias per class, in vocabulary order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxWeights {
    /// Side length the image is resized to before classification.
    pub input_size: u32,

    /// One row per class.
    pub weights: Vec<Vec<f32>>,

    /// One bias per class.
    pub bias: Vec<f32>,
}

impl SoftmaxWeights {
    /// Load weights from a JSON file. Any failure is [ClassifierError::ModelUnavailable].
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ClassifierError::ModelUnavailable(format!(
                "model weights {} unreadable: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            ClassifierError::ModelUnavailable(format!(
                "model weights {} malformed: {}",
                path.display(),
                e
            ))
        })
    }

    fn input_len(&self) -> usize {
        3 * (self.input_size as usize) * (self.input_size as usize)
    }

    fn validate(&self, classes: usize) -> Result<(), ClassifierError> {
        if self.input_size == 0 {
            return Err(ClassifierError::ModelUnavailable(
                "model input size is zero".to_string(),
            ));
        }
        if self.weights.len() != classes || self.bias.len() != classes {
            return Err(ClassifierError::ModelUnavailable(format!(
                "model has {} weight rows and {} biases but the class list has {} classes",
                self.weights.len(),
                self.bias.len(),
                classes
            )));
        }
        let expected = self.input_len();
        if let Some((row, weights)) = self
            .weights
            .iter()
            .enumerate()
            .find(|(_, w)| w.len() != expected)
        {
            return Err(ClassifierError::ModelUnavailable(format!(
                "weight row {} has {} values, expected {}",
                row,
                weights.len(),
                expected
            )));
        }
        Ok(())
    }
}

/// Linear softmax classifier over normalised pixels.
///
/// Built once from a weights file and a class list, then shared for every call.
#[derive(Debug, Clone)]
pub struct SoftmaxClassifier {
    vocabulary: ClassVocabulary,
    weights: SoftmaxWeights,
}

impl SoftmaxClassifier {
    /// Create a classifier, checking that the weights match the vocabulary.
    pub fn new(vocabulary: ClassVocabulary, weights: SoftmaxWeights) -> Result<Self, ClassifierError> {
        if vocabulary.is_empty() {
            return Err(ClassifierError::ModelUnavailable(
                "class list is empty".to_string(),
            ));
        }
        weights.validate(vocabulary.len())?;
        Ok(Self {
            vocabulary,
            weights,
        })
    }

    /// Load the weights and the class list from disk.
    pub fn load(weights_path: &Path, classes_path: &Path) -> Result<Self, ClassifierError> {
        let vocabulary = ClassVocabulary::load(classes_path)?;
        let weights = SoftmaxWeights::load(weights_path)?;
        let classifier = Self::new(vocabulary, weights)?;
        info!(
            classes = classifier.vocabulary.len(),
            input_size = classifier.weights.input_size,
            "classifier ready"
        );
        Ok(classifier)
    }

    /// The class vocabulary.
    pub fn vocabulary(&self) -> &ClassVocabulary {
        &self.vocabulary
    }

    fn logits(&self, input: &[f32]) -> Vec<f32> {
        self.weights
            .weights
            .iter()
            .zip(&self.weights.bias)
            .map(|(row, bias)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + bias)
            .collect()
    }
}

impl ImageClassifier for SoftmaxClassifier {
    fn classify(&self, image: &ImageHandle) -> Result<Prediction, ClassifierError> {
        let decoded = image.decode()?;
        let input = preprocess::to_input_vector(&decoded, self.weights.input_size);
        let probabilities = preprocess::softmax(&self.logits(&input));
        let (index, probability) = preprocess::argmax(&probabilities).ok_or_else(|| {
            ClassifierError::ModelUnavailable("model produced no outputs".to_string())
        })?;
        let label = self.vocabulary.label(index).ok_or_else(|| {
            ClassifierError::ModelUnavailable(format!("no label for class index {}", index))
        })?;
        Ok(Prediction::new(label, f64::from(probability)))
    }
}
