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

use std::sync::mpsc;
use std::sync::Arc;

use waste_classifier::{ClassifierError, ImageClassifier, ImageHandle, Prediction};

use crate::item_pool::ItemKey;
use crate::WorldError;

pub(crate) type Completed = (ItemKey, Result<Prediction, ClassifierError>);

/// Runs classify calls on a rayon pool and hands results back through a channel. Nothing is
/// applied here; the encounter loop drains results at the start of a tick.
pub(crate) struct BackgroundClassifier {
    classifier: Arc<dyn ImageClassifier + Send + Sync>,
    workers: rayon::ThreadPool,
    sender: mpsc::Sender<Completed>,
    receiver: mpsc::Receiver<Completed>,
    in_flight: usize,
}

impl BackgroundClassifier {
    pub(crate) fn new(
        classifier: Arc<dyn ImageClassifier + Send + Sync>,
        threads: usize,
    ) -> Result<Self, WorldError> {
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("classifier-{}", i))
            .build()
            .map_err(|e| WorldError::WorkerPool(e.to_string()))?;
        let (sender, receiver) = mpsc::channel();
        Ok(Self {
            classifier,
            workers,
            sender,
            receiver,
            in_flight: 0,
        })
    }

    pub(crate) fn submit(&mut self, key: ItemKey, image: ImageHandle) {
        let classifier = Arc::clone(&self.classifier);
        let sender = self.sender.clone();
        self.workers.spawn(move || {
            let outcome = classifier.classify(&image);
            // the receiver lives as long as the loop; a send error only happens during teardown
            let _ = sender.send((key, outcome));
        });
        self.in_flight += 1;
    }

    /// Results that are ready now, without waiting.
    pub(crate) fn ready(&mut self) -> Vec<Completed> {
        let mut completed = Vec::new();
        while let Ok(result) = self.receiver.try_recv() {
            completed.push(result);
        }
        self.in_flight -= completed.len();
        completed
    }

    /// Block until every submitted classification has come back.
    pub(crate) fn wait_all(&mut self) -> Vec<Completed> {
        let mut completed = Vec::with_capacity(self.in_flight);
        while completed.len() < self.in_flight {
            match self.receiver.recv() {
                Ok(result) => completed.push(result),
                Err(_) => break,
            }
        }
        self.in_flight -= completed.len();
        completed
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight
    }
}

impl std::fmt::Debug for BackgroundClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundClassifier")
            .field("threads", &self.workers.current_num_threads())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}
