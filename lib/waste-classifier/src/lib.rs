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

#![warn(missing_docs)]

//! Waste image classification.
//!
//! This crate is the contract between the beach simulation and a trained image model. The
//! simulation only ever sees [ImageClassifier]: give it an [ImageHandle], get back a
//! [Prediction] or a [ClassifierError]. The model itself is opaque beyond "label at index i" of
//! its [ClassVocabulary].
//!
//! A classifier is loaded once at startup and then shared read-only for every call. Loading a
//! model per call is never acceptable; implementations must do all file and weight work in their
//! constructor so that `classify` only touches the image.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

mod preprocess;
mod softmax;

pub use softmax::{SoftmaxClassifier, SoftmaxWeights};

/// Classifier error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifierError {
    /// The model weights or the class vocabulary are missing or unusable. Nothing can be
    /// classified until the classifier is rebuilt.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// The image could not be read or decoded. Only this one image is affected.
    #[error("image decode error: {0}")]
    ImageDecodeError(String),
}

/// Opaque reference to pixel data. Cheap to clone, so it can be handed to a worker thread.
#[derive(Debug, Clone)]
pub enum ImageHandle {
    /// An image file on disk, decoded on every use.
    Path(PathBuf),

    /// An encoded image (png, jpeg, ...) held in memory.
    Encoded(Arc<[u8]>),

    /// An already decoded image.
    Decoded(Arc<DynamicImage>),
}

impl ImageHandle {
    /// Decode the handle into pixels. Decoded handles are borrowed, everything else is read and
    /// decoded.
    pub fn decode(&self) -> Result<Cow<'_, DynamicImage>, ClassifierError> {
        match self {
            ImageHandle::Path(path) => image::open(path)
                .map(Cow::Owned)
                .map_err(|e| ClassifierError::ImageDecodeError(format!("{}: {}", path.display(), e))),
            ImageHandle::Encoded(bytes) => image::load_from_memory(bytes)
                .map(Cow::Owned)
                .map_err(|e| ClassifierError::ImageDecodeError(e.to_string())),
            ImageHandle::Decoded(image) => Ok(Cow::Borrowed(image.as_ref())),
        }
    }

    /// The file path, if this handle refers to a file.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ImageHandle::Path(path) => Some(path),
            _ => None,
        }
    }
}

impl std::fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageHandle::Path(path) => write!(f, "{}", path.display()),
            ImageHandle::Encoded(bytes) => write!(f, "<{} encoded bytes>", bytes.len()),
            ImageHandle::Decoded(image) => write!(f, "<{}x{} image>", image.width(), image.height()),
        }
    }
}

impl From<PathBuf> for ImageHandle {
    fn from(path: PathBuf) -> Self {
        ImageHandle::Path(path)
    }
}

impl From<&Path> for ImageHandle {
    fn from(path: &Path) -> Self {
        ImageHandle::Path(path.to_path_buf())
    }
}

impl From<Vec<u8>> for ImageHandle {
    fn from(bytes: Vec<u8>) -> Self {
        ImageHandle::Encoded(bytes.into())
    }
}

impl From<DynamicImage> for ImageHandle {
    fn from(image: DynamicImage) -> Self {
        ImageHandle::Decoded(Arc::new(image))
    }
}

/// Outcome of one classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Label from the classifier's closed vocabulary.
    pub label: String,

    /// Probability of the label in [0, 1]. `None` when the model only reports a label.
    pub confidence: Option<f64>,
}

impl Prediction {
    /// Create a prediction with a confidence.
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence: Some(confidence.clamp(0.0, 1.0)),
        }
    }

    /// Create a prediction without a confidence.
    pub fn label_only(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            confidence: None,
        }
    }
}

/// An image classifier.
///
/// Implementations must be side-effect free with respect to the caller's state, and must be
/// constructed once and reused.
pub trait ImageClassifier {
    /// Classify one image.
    fn classify(&self, image: &ImageHandle) -> Result<Prediction, ClassifierError>;
}

impl<T: ImageClassifier + ?Sized> ImageClassifier for Box<T> {
    fn classify(&self, image: &ImageHandle) -> Result<Prediction, ClassifierError> {
        (**self).classify(image)
    }
}

impl<T: ImageClassifier + ?Sized> ImageClassifier for Arc<T> {
    fn classify(&self, image: &ImageHandle) -> Result<Prediction, ClassifierError> {
        (**self).classify(image)
    }
}

impl<T: ImageClassifier + ?Sized> ImageClassifier for &T {
    fn classify(&self, image: &ImageHandle) -> Result<Prediction, ClassifierError> {
        (**self).classify(image)
    }
}

/// Stand-in used when the real model failed to load. Every call fails with
/// [ClassifierError::ModelUnavailable] carrying the original load failure.
#[derive(Debug, Clone)]
pub struct UnavailableClassifier {
    reason: String,
}

impl UnavailableClassifier {
    /// Create a classifier that always reports `reason`.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl ImageClassifier for UnavailableClassifier {
    fn classify(&self, _image: &ImageHandle) -> Result<Prediction, ClassifierError> {
        Err(ClassifierError::ModelUnavailable(self.reason.clone()))
    }
}

/// Ordered class vocabulary. Model output `i` means `labels[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassVocabulary {
    labels: Vec<String>,
}

impl ClassVocabulary {
    /// Create a vocabulary from labels in model output order.
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Load a vocabulary from a JSON list of strings, e.g. `["Cardboard", "Glass", "Metal"]`.
    ///
    /// A missing, unreadable, malformed or empty file is reported as
    /// [ClassifierError::ModelUnavailable], since no prediction can be named without it.
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ClassifierError::ModelUnavailable(format!(
                "class list {} unreadable: {}",
                path.display(),
                e
            ))
        })?;
        let labels: Vec<String> = serde_json::from_str(&contents).map_err(|e| {
            ClassifierError::ModelUnavailable(format!(
                "class list {} malformed: {}",
                path.display(),
                e
            ))
        })?;
        if labels.is_empty() {
            return Err(ClassifierError::ModelUnavailable(format!(
                "class list {} is empty",
                path.display()
            )));
        }
        Ok(Self { labels })
    }

    /// Label at model output index `index`.
    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether there are no classes.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels in model output order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}
