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

//! Labeled waste image discovery.
//!
//! A dataset root holds one subdirectory per class, each full of images:
//!
//! ```text
//! dataset/
//!   Cardboard/  a.jpg b.png ...
//!   Glass/      c.jpeg ...
//! ```
//!
//! [discover] walks one level of that tree and returns a shuffled, capped list of images with
//! the label they were filed under.

use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use tracing::{debug, warn};

/// Extensions accepted as images, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Dataset error.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// The dataset root does not exist or is not a directory.
    #[error("dataset root not found: {0}")]
    RootMissing(PathBuf),

    /// The dataset root could not be listed.
    #[error("cannot read {path}: {source}")]
    Io {
        /// Directory being read.
        path: PathBuf,

        /// Underlying error.
        source: std::io::Error,
    },
}

/// An image and the label of the directory it was found in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabeledImage {
    /// Name of the class directory.
    pub label: String,

    /// Full path to the image file.
    pub path: PathBuf,
}

/// Whether `path` has one of the [IMAGE_EXTENSIONS].
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let entries = std::fs::read_dir(dir).map_err(|source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    paths.sort();
    Ok(paths)
}

fn check_root(root: &Path) -> Result<(), DatasetError> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(DatasetError::RootMissing(root.to_path_buf()))
    }
}

/// Names of the class directories under `root`, sorted. This is the order a trainer assigns
/// class indices in.
pub fn class_names(root: &Path) -> Result<Vec<String>, DatasetError> {
    check_root(root)?;
    Ok(sorted_entries(root)?
        .into_iter()
        .filter(|p| p.is_dir())
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect())
}

/// Find every image one level below `root`, shuffle with `rng` and keep at most `max_images`.
///
/// Listings are sorted before shuffling, so the same seed always gives the same list. Class
/// directories that cannot be read are skipped with a warning. Files at the root itself are
/// ignored. An empty result is not an error here; callers decide whether they can run without
/// content.
pub fn discover<R>(
    root: &Path,
    max_images: usize,
    rng: &mut R,
) -> Result<Vec<LabeledImage>, DatasetError>
where
    R: rand::Rng + ?Sized,
{
    check_root(root)?;
    let mut images = Vec::new();
    for class_dir in sorted_entries(root)?.into_iter().filter(|p| p.is_dir()) {
        let label = match class_dir.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => continue,
        };
        let files = match sorted_entries(&class_dir) {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "skipping unreadable class directory");
                continue;
            }
        };
        let before = images.len();
        images.extend(
            files
                .into_iter()
                .filter(|p| p.is_file() && is_image_file(p))
                .map(|path| LabeledImage {
                    label: label.clone(),
                    path,
                }),
        );
        debug!(label = %label, count = images.len() - before, "scanned class directory");
    }

    images.shuffle(rng);
    images.truncate(max_images);
    Ok(images)
}
